use anyhow::{bail, ensure, Result};
use clap::{Parser, ValueEnum};
use rand::prelude::*;
use rand_pcg::Pcg64;
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[macro_use]
mod pact_error;

mod attention;
mod das;
mod delays;
mod eir;
mod geometry;
mod interpolate;
mod pact_image;
mod pact_sinogram;
mod wavefront;
mod window;

use attention::{combine, get_weights, Attention};
use delays::{get_delays, DelayMode};
use geometry::{CalibrationGrid, Grid, Ring};
use interpolate::BicubicField;
use pact_image::Image;
use pact_sinogram::{simulate, sources_from_image, PointSource, Sinogram};
use wavefront::{c0_field, sos_field, Circle, DoubleCircle, HomogeneousExact, HomogeneousHarmonic, SosField, Wavefront};

////////////////////////////////////////////////////////////////////////
// Main entry point
//

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Uniform body filling the ring, second-order Fourier model.
    HomogeneousHarmonic,
    /// Uniform body filling the ring, exact chord lengths.
    HomogeneousExact,
    /// Body of speed --v1 with a circular inclusion of speed --v2.
    DoubleCircle,
    /// Arbitrary speed-of-sound map read from --sos-image.
    SosMap,
}

/// Speed-of-sound corrected delay-and-sum reconstruction for ring-array
/// photoacoustic tomography.
#[derive(Parser)]
#[command(version = "0.1")]
struct Opts {
    /// Point source location in metres, as x,y. May be repeated.
    #[arg(long = "source", value_parser = parse_point)]
    sources: Vec<(f64, f64)>,
    /// Phantom image to simulate, one point source per non-zero pixel.
    #[arg(long)]
    input_image: Option<String>,
    /// Half-width in metres of the area covered by --input-image.
    #[arg(long)]
    phantom_extent: Option<f64>,
    /// Alternatively, read a recorded sinogram. Incompatible with
    /// --source and --input-image.
    #[arg(long)]
    input_sinogram: Option<String>,
    /// Transducer impulse response (one row, or one per transducer) used
    /// to phase-correct --input-sinogram.
    #[arg(long)]
    eir: Option<String>,

    /// Ring radius in metres.
    #[arg(long, default_value_t = 0.05)]
    ring_radius: f64,
    /// Number of transducers on the ring.
    #[arg(long, default_value_t = 64)]
    transducers: usize,
    /// Sample interval in seconds.
    #[arg(long, default_value_t = 4e-9)]
    sample_interval: f64,
    /// Samples recorded per transducer.
    #[arg(long, default_value_t = 12000)]
    samples: usize,
    /// Radial placement error of each transducer in metres, comma
    /// separated, one per transducer. Added to reconstruction path lengths.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    ring_error: Vec<f64>,
    /// Width of simulated pulses, in samples. 0 puts each pulse in a
    /// single sample.
    #[arg(long, default_value_t = 4.0)]
    pulse_sigma: f64,

    /// Speed of sound in the coupling medium (m/s).
    #[arg(long, default_value_t = 1480.0)]
    v0: f64,
    /// Speed of sound in the body (m/s).
    #[arg(long, default_value_t = 1520.0)]
    v1: f64,
    #[arg(value_enum, long, default_value = "homogeneous-harmonic")]
    scenario: Scenario,
    /// Body radius for --scenario=double-circle.
    #[arg(long)]
    body_radius: Option<f64>,
    /// Inclusion centre x for --scenario=double-circle.
    #[arg(long)]
    inclusion_x: Option<f64>,
    /// Inclusion centre y for --scenario=double-circle.
    #[arg(long)]
    inclusion_y: Option<f64>,
    /// Inclusion radius for --scenario=double-circle.
    #[arg(long)]
    inclusion_radius: Option<f64>,
    /// Speed of sound in the inclusion for --scenario=double-circle.
    #[arg(long)]
    v2: Option<f64>,
    /// Speed-of-sound map for --scenario=sos-map. Black is --v0, white
    /// is --v1.
    #[arg(long)]
    sos_image: Option<String>,
    /// Half-width in metres of the area covered by --sos-image.
    #[arg(long)]
    sos_extent: Option<f64>,

    /// Width of reconstructed image.
    #[arg(long, default_value_t = 101)]
    width: usize,
    /// Height of reconstructed image.
    #[arg(long, default_value_t = 101)]
    height: usize,
    /// Half-width in metres of the reconstructed area.
    #[arg(long, default_value_t = 5e-3)]
    extent: f64,
    /// Reconstruct on the 25x25 calibration grid with this pitch
    /// instead. Overrides --width, --height and --extent.
    #[arg(long)]
    calibration_pitch: Option<f64>,

    /// Number of candidate delays to reconstruct with.
    #[arg(long, default_value_t = 16)]
    n_delays: usize,
    /// How candidate delays are spaced: uniform or quadric.
    #[arg(long, default_value = "uniform")]
    delay_mode: DelayMode,
    /// How the candidate images are blended: uniform, onehot or euclidean.
    #[arg(long, default_value = "onehot")]
    attention: Attention,
    /// Smooth the C0 field with a Gaussian of this many pixels before
    /// weighting.
    #[arg(long)]
    smooth_sigma: Option<f64>,

    /// How much uniform noise to add to the sinogram, as fraction of its
    /// maximum value.
    #[arg(long)]
    noise: Option<f64>,
    /// Seed for the random noise (for reproducibility)
    #[arg(long)]
    seed: Option<u64>,

    /// File to write the reconstructed image to.
    #[arg(long)]
    output_image: Option<String>,
    /// File to write the (simulated or corrected) sinogram to.
    #[arg(long)]
    output_sinogram: Option<String>,
    /// File to write the uncorrected, zero-delay reconstruction to.
    #[arg(long)]
    output_das: Option<String>,
    /// File to write the C0 field to.
    #[arg(long)]
    output_c0: Option<String>,
}

fn parse_point(s: &str) -> std::result::Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let parse = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("bad coordinate '{}': {}", v, e));
    Ok((parse(x)?, parse(y)?))
}

// The medium being imaged, from which a wavefront model can be built for
// any source position.
struct Medium {
    scenario: Scenario,
    radius: f64,
    v0: f64,
    v1: f64,
    body: Circle,
    inclusion: Circle,
    sos: Option<BicubicField>,
}

impl Medium {
    fn from_opts(opts: &Opts) -> Result<Medium> {
        const DEFAULT_BODY_RADIUS: f64 = 0.02;
        const DEFAULT_INCLUSION_RADIUS: f64 = 5e-3;
        const DEFAULT_V2: f64 = 1560.0;

        let double_circle_flags = [
            opts.body_radius.is_some(),
            opts.inclusion_x.is_some(),
            opts.inclusion_y.is_some(),
            opts.inclusion_radius.is_some(),
            opts.v2.is_some(),
        ];
        if opts.scenario != Scenario::DoubleCircle {
            ensure!(
                !double_circle_flags.iter().any(|x| *x),
                "Body and inclusion flags can only be used with --scenario=double-circle"
            );
        }
        if opts.scenario != Scenario::SosMap {
            ensure!(
                opts.sos_image.is_none() && opts.sos_extent.is_none(),
                "--sos-image and --sos-extent can only be used with --scenario=sos-map"
            );
        }

        let sos = if opts.scenario == Scenario::SosMap {
            let Some(name) = &opts.sos_image else {
                bail!("--scenario=sos-map needs --sos-image");
            };
            // Grey level 0..255 maps linearly onto v0..v1.
            let image = Image::load(Path::new(name))?.flip_rows();
            let sos = Image::from_fn(image.width, image.height, |x, y| {
                opts.v0 + image[(x, y)] * (opts.v1 - opts.v0) / 255.0
            });
            let extent = opts.sos_extent.unwrap_or(opts.ring_radius);
            let grid = Grid::centred(sos.width, sos.height, extent)?;
            Some(sos_field(&grid, sos)?)
        } else {
            None
        };

        Ok(Medium {
            scenario: opts.scenario,
            radius: opts.ring_radius,
            v0: opts.v0,
            v1: opts.v1,
            body: Circle {
                x: 0.0,
                y: 0.0,
                radius: opts.body_radius.unwrap_or(DEFAULT_BODY_RADIUS),
                sos: opts.v1,
            },
            inclusion: Circle {
                x: opts.inclusion_x.unwrap_or(0.0),
                y: opts.inclusion_y.unwrap_or(0.0),
                radius: opts.inclusion_radius.unwrap_or(DEFAULT_INCLUSION_RADIUS),
                sos: opts.v2.unwrap_or(DEFAULT_V2),
            },
            sos,
        })
    }

    fn model(&self, x: f64, y: f64) -> pact_error::Result<Box<dyn Wavefront>> {
        let model: Box<dyn Wavefront> = match self.scenario {
            Scenario::HomogeneousHarmonic => Box::new(HomogeneousHarmonic::at(x, y, self.radius, self.v0, self.v1)?),
            Scenario::HomogeneousExact => Box::new(HomogeneousExact::at(x, y, self.radius, self.v0, self.v1)?),
            Scenario::DoubleCircle => Box::new(DoubleCircle::at(x, y, &self.body, &self.inclusion, self.v0)?),
            Scenario::SosMap => {
                let field = self.sos.as_ref().ok_or_else(|| {
                    pact_error::PactError::InvalidInput("no speed-of-sound map loaded".to_string())
                })?;
                Box::new(SosField::at(field, self.v0, self.radius, x, y)?)
            }
        };
        Ok(model)
    }
}

// Produce the sinogram to reconstruct, and the point sources it was
// simulated from, if any.
fn generate_sinogram(opts: &Opts, ring: &Ring, medium: &Medium) -> Result<(Vec<PointSource>, Sinogram)> {
    if let Some(name) = &opts.input_sinogram {
        ensure!(
            opts.sources.is_empty() && opts.input_image.is_none(),
            "Please specify only one of --input-sinogram, --source and --input-image"
        );
        let sinogram = Sinogram::load(Path::new(name))?;
        ensure!(
            sinogram.transducers == ring.transducers,
            "--input-sinogram has {} rows but --transducers is {}",
            sinogram.transducers,
            ring.transducers
        );
        let sinogram = match &opts.eir {
            Some(eir_name) => {
                info!("Correcting EIR phase from {}", eir_name);
                eir::deconv_pa_signal(&sinogram, &Sinogram::load(Path::new(eir_name))?)?
            }
            None => sinogram,
        };
        return Ok((Vec::new(), sinogram));
    }

    ensure!(opts.eir.is_none(), "--eir can only be used with --input-sinogram");
    let sources = if let Some(name) = &opts.input_image {
        ensure!(
            opts.sources.is_empty(),
            "Please specify only one of --source and --input-image"
        );
        let image = Image::load(Path::new(name))?.flip_rows();
        let extent = opts.phantom_extent.unwrap_or_else(|| {
            info!("--phantom-extent not specified, using --extent of {}", opts.extent);
            opts.extent
        });
        sources_from_image(&image, &Grid::centred(image.width, image.height, extent)?)?
    } else if !opts.sources.is_empty() {
        ensure!(
            opts.phantom_extent.is_none(),
            "--phantom-extent can only be used with --input-image"
        );
        opts.sources
            .iter()
            .map(|&(x, y)| PointSource { x, y, amplitude: 1.0 })
            .collect()
    } else {
        bail!("One of --source, --input-image and --input-sinogram must be specified");
    };

    info!("Simulating {} sources", sources.len());
    let sinogram = simulate(
        ring,
        opts.sample_interval,
        opts.v0,
        opts.samples,
        opts.pulse_sigma,
        &sources,
        |x, y| medium.model(x, y),
    )?;
    Ok((sources, sinogram))
}

// None if no --ring-error was given.
fn ring_error(opts: &Opts) -> Result<Option<&[f64]>> {
    if opts.ring_error.is_empty() {
        return Ok(None);
    }
    ensure!(
        opts.ring_error.len() == opts.transducers,
        "--ring-error has {} entries but --transducers is {}",
        opts.ring_error.len(),
        opts.transducers
    );
    Ok(Some(opts.ring_error.as_slice()))
}

fn add_noise(sinogram: &Sinogram, opts: &Opts) -> Sinogram {
    const DEFAULT_SEED: u64 = 42;
    const DEFAULT_NOISE: f64 = 0.0;

    let seed = opts.seed.unwrap_or(DEFAULT_SEED);
    let noise = opts.noise.unwrap_or(DEFAULT_NOISE);

    let mut rng = Pcg64::seed_from_u64(seed);
    sinogram.add_noise(&mut rng, noise)
}

// C0 over the reconstruction grid, optionally smoothed.
fn generate_c0(opts: &Opts, grid: &Grid, calibration: Option<&CalibrationGrid>, medium: &Medium) -> Result<Image> {
    let c0 = match calibration {
        // Closed form, no need to build a model per pixel.
        Some(cal) if opts.scenario == Scenario::HomogeneousHarmonic => {
            cal.c0_image(opts.ring_radius, opts.v0, opts.v1)
        }
        _ => c0_field(grid, |x, y| medium.model(x, y))?,
    };
    Ok(match opts.smooth_sigma {
        Some(sigma) => {
            // Out to three sigma either side.
            let size = 2 * (3.0 * sigma).ceil().max(0.0) as usize + 1;
            let kernel = window::get_gaussian_window(sigma, size)?;
            debug!("Smoothing C0 with a {}x{} window", size, size);
            window::smooth(&c0, &kernel)
        }
        None => c0,
    })
}

// Log where the reconstruction peaks, relative to the nearest simulated
// source.
fn report_peak(grid: &Grid, image: &Image, sources: &[PointSource]) {
    let (s, t, value) = image.argmax();
    let (x, y) = (grid.x(s), grid.y(t));
    info!("Reconstruction peaks at ({:.6}, {:.6}) with value {:.4}", x, y, value);

    let nearest = sources.iter().map(|src| (src.x - x).hypot(src.y - y)).fold(f64::INFINITY, f64::min);
    if nearest.is_finite() {
        info!("Nearest source is {:.6} m away", nearest);
    }
}

fn save_image(image: &Image, name: &str) -> Result<()> {
    // Row 0 is the bottom of the grid; PNG row 0 is the top.
    image.flip_rows().save_normalised(Path::new(name))?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opts: Opts = Opts::parse();
    ensure!(opts.n_delays >= 1, "--n-delays must be at least 1");

    let ring = Ring::new(opts.ring_radius, opts.transducers)?;
    let ring_error = ring_error(&opts)?;
    let medium = Medium::from_opts(&opts)?;

    let (sources, mut sinogram) = generate_sinogram(&opts, &ring, &medium)?;
    if opts.noise.is_some() {
        sinogram = add_noise(&sinogram, &opts);
    } else {
        ensure!(opts.seed.is_none(), "--seed can only be used with --noise");
    }

    let calibration = opts.calibration_pitch.map(CalibrationGrid::new);
    let grid = match &calibration {
        Some(cal) => {
            ensure!(cal.pitch > 0.0, "--calibration-pitch must be positive");
            cal.grid()?
        }
        None => Grid::centred(opts.width, opts.height, opts.extent)?,
    };
    let corner = grid.x(0).hypot(grid.y(0));
    if corner >= opts.ring_radius {
        warn!("Reconstruction grid reaches the ring; corner pixels are unreliable");
    }

    let delays = get_delays(opts.ring_radius, opts.v0, opts.v1, opts.n_delays, opts.delay_mode)?;
    debug!("{} delays: {:?}", opts.delay_mode, delays);
    let stack = das::reconstruct_stack(
        opts.ring_radius,
        opts.sample_interval,
        opts.v0,
        &sinogram,
        &grid,
        &delays,
        ring_error,
    )?;

    info!("Building C0 field for {:?}", opts.scenario);
    let c0 = generate_c0(&opts, &grid, calibration.as_ref(), &medium)?;
    let weights = get_weights(&c0, &delays, opts.attention);
    let reconstruction = combine(&stack, &weights)?;
    info!("Combined {} images with {} attention", stack.len(), opts.attention);
    report_peak(&grid, &reconstruction, &sources);

    if let Some(name) = &opts.output_sinogram {
        sinogram.save(Path::new(name))?;
    }

    if let Some(name) = &opts.output_image {
        save_image(&reconstruction, name)?;
    }

    if let Some(name) = &opts.output_das {
        // Both delay modes start at zero.
        save_image(&stack[0], name)?;
    }

    if let Some(name) = &opts.output_c0 {
        save_image(&c0, name)?;
    }

    Ok(())
}
