//! Score a few images against several prompts.
//!
//! Run with: cargo run --release --example prompt_scores -- <image>...

use eyre::WrapErr as _;

const PROMPTS: &[&str] = &[
    "a photo of a cat",
    "a photo of a dog",
    "a diagram",
    "a landscape at sunset",
];

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let image_paths: Vec<String> = std::env::args().skip(1).collect();
    if image_paths.is_empty() {
        eyre::bail!("usage: prompt_scores <image>...");
    }

    tracing::info!("Loading CLIP encoder...");
    let encoder = cliclip_candle::ClipEncoder::from_hub(cliclip_candle::default_device(false)?)
        .wrap_err("failed to load CLIP encoder")?;

    let mut candidates = Vec::with_capacity(image_paths.len());
    for path in &image_paths {
        let image = image::open(path).wrap_err_with(|| format!("failed to open {path}"))?;
        let embedding = encoder.encode_image(&image)?;
        tracing::info!(%path, dim = embedding.dim(), norm = embedding.norm(), "image embedded");
        candidates.push(cliclip_core::Candidate::new(path.clone(), embedding));
    }

    for prompt in PROMPTS {
        let query = encoder.encode_text(prompt)?;
        let results = cliclip_rank::rank(&query, &candidates, candidates.len())?;

        for result in &results {
            tracing::info!(
                %prompt,
                rank = result.rank,
                path = %result.id,
                score = format!("{:.2}", result.score),
                "ranked"
            );
        }
    }

    Ok(())
}
