//! Texture asset builder
//!
//! `resource_creator output_name resource_id mipmap_level_count <layer paths...>`
//! loads every layer image, builds its mip chain and writes `output_name.cr`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use render_core::assets::{TextureAsset, ASSET_EXTENSION};

mod mipmaps;

#[derive(Debug)]
struct CreationParameters {
    output: PathBuf,
    resource_id: String,
    mipmap_levels: u8,
    layers: Vec<PathBuf>,
}

impl CreationParameters {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let output = matches
            .get_one::<String>("output_name")
            .context("missing output name")?;
        let resource_id = matches
            .get_one::<String>("resource_id")
            .context("missing resource id")?
            .clone();
        let mipmap_levels = *matches
            .get_one::<u8>("mipmap_level_count")
            .context("missing mipmap level count")?;
        if mipmap_levels == 0 {
            bail!("mipmap_level_count must be at least 1");
        }
        let layers = matches
            .get_many::<String>("layers")
            .context("at least one layer file is required")?
            .map(PathBuf::from)
            .collect();

        Ok(Self {
            output: PathBuf::from(format!("{output}.{ASSET_EXTENSION}")),
            resource_id,
            mipmap_levels,
            layers,
        })
    }
}

fn cli() -> Command {
    Command::new("resource_creator")
        .about("Builds a layered, mipmapped texture asset")
        .arg(Arg::new("output_name").required(true).help("Output file name without extension"))
        .arg(Arg::new("resource_id").required(true).help("Resource identifier hashed into the header"))
        .arg(
            Arg::new("mipmap_level_count")
                .required(true)
                .value_parser(value_parser!(u8))
                .help("Number of mip levels per layer"),
        )
        .arg(
            Arg::new("layers")
                .required(true)
                .num_args(1..)
                .help("One image file per layer"),
        )
}

fn create_texture(parameters: &CreationParameters) -> Result<TextureAsset> {
    let mut layers = Vec::with_capacity(parameters.layers.len());
    for path in &parameters.layers {
        layers.push(load_layer(path, parameters.mipmap_levels)?);
    }
    TextureAsset::new(parameters.resource_id.clone(), layers)
        .with_context(|| format!("invalid texture '{}'", parameters.resource_id))
}

fn load_layer(path: &Path, mipmap_levels: u8) -> Result<Vec<render_core::assets::TextureMip>> {
    let image = image::open(path)
        .with_context(|| format!("failed to load {}", path.display()))?
        .to_rgba8();
    log::info!("Loaded {} ({}x{})", path.display(), image.width(), image.height());
    Ok(mipmaps::build_chain(&image, mipmap_levels))
}

fn main() -> Result<()> {
    render_core::foundation::logging::init_with_level(log::LevelFilter::Info);

    let parameters = CreationParameters::from_matches(&cli().get_matches())?;
    let texture = create_texture(&parameters)?;
    texture
        .save(&parameters.output)
        .with_context(|| format!("failed to write {}", parameters.output.display()))?;

    log::info!(
        "Wrote {} ({} layers, {} mips)",
        parameters.output.display(),
        texture.layer_count(),
        texture.mip_level_count()
    );
    Ok(())
}
