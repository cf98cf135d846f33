//! Command-line interface for `geotable`.
//!
//! This binary is a thin façade over [`geotable_core`]: it parses arguments
//! with [`clap`], configures [`tracing`] logging (with library `log` records
//! bridged in), and delegates to the core operations.
//!
//! # Available Commands
//!
//! - `convert` - Load a dataset, optionally filter and reproject it, and save it
//! - `info` - Display layers, geometry kinds, projections and fields
//! - `utm` - Print the UTM descriptor for the centroid of a dataset
//! - `draw` - Render a dataset as SVG
//! - `drivers` - List all available format drivers and their capabilities

mod display;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use geotable_core::drivers::{self, get_available_drivers};
use geotable_core::error::driver_not_found;
use geotable_core::formats::{CsvReadOptions, CsvWriteOptions};
use geotable_core::operations::{self, LoadOptions, SaveOptions};
use geotable_core::{BoundingBox, Geometry, GeoTableError, ProjectionReference, draw};

#[derive(Parser)]
#[command(
    name = "geotable",
    version,
    about = "Load geospatial files into one table and write them back in any format and projection",
    long_about = "geotable reads shapefile archives, KML/KMZ, GeoJSON and delimited text, finds \
                  the geometry in each layer, and converts between formats and projections."
)]
/// Command-line arguments and options for the `geotable` CLI.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that loads a dataset.
#[derive(clap::Args, Debug, Default)]
struct LoadArgs {
    /// Projection of the source: a PROJ string, `@proj4` for the sidecar file,
    /// `lonlat` or `mercator`. Defaults to the sidecar, the embedded CRS, then lon/lat.
    #[arg(long, value_name = "PROJ")]
    source_proj4: Option<String>,

    /// Strip z ordinates.
    #[arg(long)]
    drop_z: bool,

    /// Keep rows intersecting `minx,miny,maxx,maxy`, in source coordinates.
    #[arg(long, value_name = "BBOX", allow_hyphen_values = true)]
    bbox: Option<String>,

    /// Keep rows intersecting this WKT polygon, in source coordinates.
    #[arg(long, value_name = "WKT")]
    bounding_polygon: Option<String>,

    /// Keep only the named layer (repeatable).
    #[arg(long = "layer", value_name = "NAME")]
    layers: Vec<String>,

    /// Field delimiter for delimited text input.
    #[arg(long, value_name = "CHAR")]
    delimiter: Option<char>,

    /// Parse date and time columns in delimited text instead of keeping them as text.
    #[arg(long)]
    parse_dates: bool,
}

impl LoadArgs {
    fn to_options(&self) -> Result<LoadOptions> {
        let mut csv = CsvReadOptions::new().with_parse_dates(self.parse_dates);
        if let Some(delimiter) = self.delimiter {
            csv = csv.with_delimiter(delimiter_byte(delimiter)?);
        }
        let mut options = LoadOptions::new().with_drop_z(self.drop_z).with_csv(csv);
        if let Some(proj4) = &self.source_proj4 {
            options = options.with_source_proj4(proj4.parse()?);
        }
        if let Some(bbox) = &self.bbox {
            options = options.with_bounding_box(bbox.parse::<BoundingBox>()?);
        }
        if let Some(wkt) = &self.bounding_polygon {
            options = options.with_bounding_polygon(Geometry::from_wkt(wkt)?);
        }
        if !self.layers.is_empty() {
            options = options.with_layers(self.layers.iter().cloned());
        }
        Ok(options)
    }
}

fn delimiter_byte(delimiter: char) -> Result<u8> {
    u8::try_from(delimiter).map_err(|_| anyhow!("Delimiter '{delimiter}' is not a single-byte character."))
}

/// Available subcommands for the `geotable` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Converts a dataset to another format and/or projection.
    Convert {
        /// Path to the input dataset.
        #[arg(short, long, value_name = "DATASET")]
        input: PathBuf,

        /// Path for the output dataset.
        #[arg(short, long, value_name = "DATASET")]
        output: PathBuf,

        /// Target projection: a PROJ string, `lonlat`, `mercator` or `utm`.
        #[arg(long, value_name = "PROJ")]
        target_proj4: Option<String>,

        /// Driver for the output; defaults to the one matching the output extension.
        #[arg(long, value_name = "DRIVER")]
        output_driver: Option<String>,

        /// Field delimiter for delimited text output.
        #[arg(long, value_name = "CHAR")]
        output_delimiter: Option<char>,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Displays layers, geometry kinds, projections and fields of a dataset.
    Info {
        /// Path to the input dataset.
        #[arg(value_name = "DATASET")]
        input: PathBuf,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Prints the UTM projection descriptor for the centroid of a dataset.
    Utm {
        /// Path to the input dataset.
        #[arg(value_name = "DATASET")]
        input: PathBuf,
    },

    /// Renders a dataset as SVG, one colour per layer.
    Draw {
        /// Path to the input dataset.
        #[arg(value_name = "DATASET")]
        input: PathBuf,

        /// Path for the SVG file.
        #[arg(short, long, value_name = "SVG")]
        output: PathBuf,

        /// Projection to draw in.
        #[arg(long, value_name = "PROJ")]
        target_proj4: Option<String>,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Lists all available drivers and their capabilities.
    Drivers,
}

/// Entry point for the `geotable` command-line interface.
///
/// # Errors
///
/// Returns an error if command execution fails or if the logging system cannot be initialized.
fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            target_proj4,
            output_driver,
            output_delimiter,
            load,
        } => handle_convert(
            &input,
            &output,
            target_proj4.as_deref(),
            output_driver.as_deref(),
            output_delimiter,
            &load,
        ),
        Commands::Info { input, load } => handle_info(&input, &load),
        Commands::Utm { input } => handle_utm(&input),
        Commands::Draw {
            input,
            output,
            target_proj4,
            load,
        } => handle_draw(&input, &output, target_proj4.as_deref(), &load),
        Commands::Drivers => {
            display::display_drivers(&get_available_drivers());
            Ok(())
        },
    };
    result.map_err(explain)
}

/// Adds the core's recovery suggestion to errors that carry one.
fn explain(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<GeoTableError>() {
        Some(core) => match core.recovery_suggestion() {
            Some(hint) => anyhow!("{}\n\nHint: {hint}", core.user_message()),
            None => anyhow!("{}", core.user_message()),
        },
        None => err,
    }
}

fn parse_projection(text: &str) -> Result<ProjectionReference> {
    Ok(text.parse()?)
}

fn handle_convert(
    input: &Path,
    output: &Path,
    target_proj4: Option<&str>,
    output_driver: Option<&str>,
    output_delimiter: Option<char>,
    load: &LoadArgs,
) -> Result<()> {
    let load_options = load.to_options()?;
    let mut save_options = SaveOptions::new();
    if let Some(name) = output_driver {
        let driver = drivers::find_driver(name)
            .ok_or_else(|| GeoTableError::from(driver_not_found(name)))?;
        save_options = save_options.with_driver(driver);
    }
    if let Some(target) = target_proj4 {
        save_options = save_options.with_target_proj4(parse_projection(target)?);
    }
    if let Some(delimiter) = output_delimiter {
        let csv = CsvWriteOptions::new().with_delimiter(delimiter_byte(delimiter)?);
        save_options = save_options.with_csv(csv);
    }

    let rows = operations::convert(input, output, &load_options, &save_options)?;
    info!("Wrote {rows} rows to {}", output.display());
    Ok(())
}

fn handle_info(input: &Path, load: &LoadArgs) -> Result<()> {
    let info = operations::describe(input, &load.to_options()?)?;
    display::display_dataset_info(&info);
    Ok(())
}

fn handle_utm(input: &Path) -> Result<()> {
    let proj4 = operations::load_utm_proj4(input)?;
    println!("{proj4}");
    Ok(())
}

fn handle_draw(input: &Path, output: &Path, target_proj4: Option<&str>, load: &LoadArgs) -> Result<()> {
    let mut options = load.to_options()?;
    if let Some(target) = target_proj4 {
        options = options.with_target_proj4(parse_projection(target)?);
    }
    let table = operations::load(input, &options)?;
    draw::write_svg(&table, output)
        .with_context(|| format!("Failed to draw {}", input.display()))?;
    info!("Drew {} rows to {}", table.len(), output.display());
    Ok(())
}
