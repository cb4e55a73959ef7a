//! CLI for ranking local images against a text prompt.

// CLI binaries need to print user-facing output
#![allow(
    clippy::print_stdout,
    reason = "CLI binary needs stdout for user output"
)]

use eyre::WrapErr as _;

/// Print a progress line every this many images (unless `--verbose`).
const PROGRESS_INTERVAL: usize = 25;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    search(&args)
}

use clap::Parser as _;

#[derive(clap::Parser)]
#[command(name = "cliclip")]
#[command(about = "Search for images based on textual prompts using CLIP")]
struct Args {
    /// Directory containing the images
    #[arg(short, long)]
    directory: std::path::PathBuf,

    /// Text prompt
    #[arg(short, long)]
    prompt: String,

    /// Number of top scored images to display
    #[arg(short, long, default_value = "15")]
    top: usize,

    /// Display rank and score along with each path
    #[arg(short, long)]
    score: bool,

    /// Output JSON with rank, path and score
    #[arg(long)]
    json: bool,

    /// Use cosine similarity instead of the raw scaled dot product
    #[arg(long)]
    cosine: bool,

    /// Run the model on the CPU even if an accelerator is available
    #[arg(long)]
    cpu: bool,

    /// Directory holding model.safetensors and tokenizer.json
    /// (downloaded from the HuggingFace Hub when omitted)
    #[arg(long)]
    model_dir: Option<std::path::PathBuf>,

    /// Also search subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Number of images encoded per forward pass
    #[arg(long, default_value = "8")]
    batch_size: std::num::NonZeroUsize,

    /// Show verbose output (files being processed)
    #[arg(short, long)]
    verbose: bool,
}

/// Load the CLIP encoder from a local directory or the HuggingFace Hub.
fn load_encoder(
    model_dir: Option<&std::path::Path>,
    force_cpu: bool,
) -> eyre::Result<cliclip_candle::ClipEncoder> {
    let device = cliclip_candle::default_device(force_cpu)?;

    match model_dir {
        Some(dir) => {
            eprintln!("Loading CLIP model from {}...", dir.display());
            cliclip_candle::ClipEncoder::load_with_device(
                dir.join(cliclip_candle::MODEL_FILE),
                dir.join(cliclip_candle::TOKENIZER_FILE),
                device,
            )
            .wrap_err_with(|| format!("failed to load CLIP encoder from {}", dir.display()))
        }
        None => {
            eprintln!("Loading CLIP model from {}...", cliclip_candle::MODEL_REPO);
            cliclip_candle::ClipEncoder::from_hub(device).wrap_err("failed to load CLIP encoder")
        }
    }
}

fn search(args: &Args) -> eyre::Result<()> {
    let paths = cliclip_scan::find_images(&args.directory, args.recursive)
        .wrap_err_with(|| format!("failed to scan {}", args.directory.display()))?;

    if paths.is_empty() {
        eprintln!("No images found in {}", args.directory.display());
        if args.json {
            println!("[]");
        }
        return Ok(());
    }

    eprintln!("Found {} images in {}", paths.len(), args.directory.display());

    let mut encoder = load_encoder(args.model_dir.as_deref(), args.cpu)?;

    let similarity = if args.cosine {
        cliclip_rank::Similarity::Cosine
    } else {
        cliclip_rank::Similarity::Dot
    };

    let options = RankOptions {
        ranker: cliclip_rank::Ranker::new(similarity),
        top: args.top,
        batch_size: args.batch_size.get(),
        verbose: args.verbose,
    };

    let ranking = rank_images(&mut encoder, &args.prompt, &paths, &options)?;

    for mismatch in &ranking.skipped {
        tracing::warn!(
            id = %mismatch.id,
            expected = mismatch.expected,
            actual = mismatch.actual,
            "skipped candidate with mismatched dimension"
        );
    }

    print!("{}", render_results(&ranking.results, args.score, args.json)?);

    Ok(())
}

struct RankOptions {
    ranker: cliclip_rank::Ranker,
    top: usize,
    batch_size: usize,
    verbose: bool,
}

/// Embed the prompt and every image, then rank the images.
fn rank_images<P: cliclip_core::EmbeddingProvider>(
    provider: &mut P,
    prompt: &str,
    paths: &[std::path::PathBuf],
    options: &RankOptions,
) -> eyre::Result<cliclip_rank::Ranking> {
    let query = provider
        .embed_text(prompt)
        .wrap_err("failed to encode prompt")?;

    let candidates = embed_images(provider, paths, options.batch_size, options.verbose);
    tracing::info!(
        images = paths.len(),
        embedded = candidates.len(),
        "finished embedding images"
    );

    Ok(options.ranker.rank_skipping(&query, &candidates, options.top))
}

/// Embed images in batches. Files that cannot be opened or encoded are
/// skipped with a warning; input order is preserved for the rest.
fn embed_images<P: cliclip_core::EmbeddingProvider>(
    provider: &mut P,
    paths: &[std::path::PathBuf],
    batch_size: usize,
    verbose: bool,
) -> Vec<cliclip_core::Candidate> {
    let total = paths.len();
    let mut processed = 0;
    let mut candidates = Vec::with_capacity(total);

    for batch in paths.chunks(batch_size.max(1)) {
        let mut ids = Vec::with_capacity(batch.len());
        let mut images = Vec::with_capacity(batch.len());

        for path in batch {
            processed += 1;
            if verbose {
                eprintln!("  {}", path.display());
            } else if processed % PROGRESS_INTERVAL == 0 || processed == total {
                eprintln!("Processing images: {processed}/{total}");
            }

            match image::open(path) {
                Ok(image) => {
                    ids.push(path.display().to_string());
                    images.push(image);
                }
                Err(e) => {
                    tracing::warn!(?path, %e, "skipping unreadable image");
                }
            }
        }

        if images.is_empty() {
            continue;
        }

        let embeddings: Vec<Option<cliclip_core::Embedding>> =
            match provider.embed_images(&images) {
                Ok(embeddings) if embeddings.len() == images.len() => {
                    embeddings.into_iter().map(Some).collect()
                }
                result => {
                    match result {
                        Ok(embeddings) => tracing::warn!(
                            expected = images.len(),
                            got = embeddings.len(),
                            "batch returned wrong number of embeddings, encoding one by one"
                        ),
                        Err(e) => tracing::warn!(?e, "batch encoding failed, encoding one by one"),
                    }

                    images
                        .iter()
                        .zip(&ids)
                        .map(|(image, id)| match provider.embed_image(image) {
                            Ok(embedding) => Some(embedding),
                            Err(e) => {
                                tracing::warn!(%id, ?e, "failed to encode image");
                                None
                            }
                        })
                        .collect()
                }
            };

        candidates.extend(
            ids.into_iter()
                .zip(embeddings)
                .filter_map(|(id, embedding)| {
                    embedding.map(|embedding| cliclip_core::Candidate { id, embedding })
                }),
        );
    }

    candidates
}

/// JSON output for a ranked image.
#[derive(serde::Serialize)]
struct JsonResult<'a> {
    rank: usize,
    path: &'a str,
    score: f32,
}

/// Render results in ranking order: JSON, `Rank N: path (score: S)` lines,
/// or bare paths. Every line is newline-terminated, so an empty ranking
/// renders as nothing outside of JSON mode.
fn render_results(
    results: &[cliclip_core::RankedResult],
    show_score: bool,
    json: bool,
) -> eyre::Result<String> {
    if json {
        let results: Vec<JsonResult<'_>> = results
            .iter()
            .map(|r| JsonResult {
                rank: r.rank,
                path: &r.id,
                score: r.score,
            })
            .collect();
        let json = serde_json::to_string_pretty(&results).wrap_err("failed to serialize JSON")?;
        return Ok(format!("{json}\n"));
    }

    Ok(results
        .iter()
        .map(|r| {
            if show_score {
                format!("Rank {}: {} (score: {:.2})\n", r.rank, r.id, r.score)
            } else {
                format!("{}\n", r.id)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;

    /// Embeds images by their top-left pixel color and text by keyword.
    struct ColorProvider {
        fail_batches: bool,
        batch_calls: usize,
        single_calls: usize,
    }

    impl ColorProvider {
        fn new() -> Self {
            Self {
                fail_batches: false,
                batch_calls: 0,
                single_calls: 0,
            }
        }
    }

    impl cliclip_core::EmbeddingProvider for ColorProvider {
        fn embed_text(&mut self, text: &str) -> eyre::Result<cliclip_core::Embedding> {
            let v = match text {
                "red" => vec![1.0, 0.0, 0.0],
                "green" => vec![0.0, 1.0, 0.0],
                "blue" => vec![0.0, 0.0, 1.0],
                other => eyre::bail!("unknown prompt {other}"),
            };
            Ok(cliclip_core::Embedding::new(v))
        }

        fn embed_image(
            &mut self,
            image: &image::DynamicImage,
        ) -> eyre::Result<cliclip_core::Embedding> {
            self.single_calls += 1;
            let rgb = image.to_rgb8();
            let pixel = rgb.get_pixel(0, 0);
            // Pure white stands in for an image from a different model.
            if pixel.0 == [255, 255, 255] {
                return Ok(cliclip_core::Embedding::new(vec![1.0, 1.0]));
            }
            Ok(cliclip_core::Embedding::new(
                pixel.0.iter().map(|&c| f32::from(c) / 255.0).collect(),
            ))
        }

        fn embed_images(
            &mut self,
            images: &[image::DynamicImage],
        ) -> eyre::Result<Vec<cliclip_core::Embedding>> {
            self.batch_calls += 1;
            if self.fail_batches {
                eyre::bail!("batch failure");
            }
            images.iter().map(|image| self.embed_image(image)).collect()
        }
    }

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cliclip-cli-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(dir: &std::path::Path, name: &str, rgb: [u8; 3]) -> std::path::PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(4, 4, image::Rgb(rgb))
            .save(&path)
            .unwrap();
        path
    }

    fn options(top: usize, batch_size: usize) -> RankOptions {
        RankOptions {
            ranker: cliclip_rank::Ranker::default(),
            top,
            batch_size,
            verbose: false,
        }
    }

    #[test]
    fn test_rank_images_end_to_end() {
        let dir = scratch_dir("e2e");
        write_png(&dir, "crimson.png", [200, 0, 0]);
        write_png(&dir, "navy.png", [0, 0, 128]);
        write_png(&dir, "red.png", [255, 0, 0]);
        std::fs::write(dir.join("broken.jpg"), b"not an image").unwrap();
        std::fs::write(dir.join("readme.txt"), b"ignored").unwrap();

        let paths = cliclip_scan::find_images(&dir, false).unwrap();
        assert_eq!(paths.len(), 4);

        let mut provider = ColorProvider::new();
        let ranking = rank_images(&mut provider, "red", &paths, &options(2, 2)).unwrap();

        let ids: Vec<String> = ranking.results.iter().map(|r| r.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                dir.join("red.png").display().to_string(),
                dir.join("crimson.png").display().to_string(),
            ]
        );
        assert!((ranking.results[0].score - 100.0).abs() < 1e-3);
        assert!(ranking.skipped.is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_mismatched_candidates_are_skipped() {
        let dir = scratch_dir("mismatch");
        write_png(&dir, "a.png", [0, 255, 0]);
        write_png(&dir, "b.png", [255, 255, 255]);

        let paths = cliclip_scan::find_images(&dir, false).unwrap();
        let mut provider = ColorProvider::new();
        let ranking = rank_images(&mut provider, "green", &paths, &options(15, 8)).unwrap();

        assert_eq!(ranking.results.len(), 1);
        assert_eq!(ranking.results[0].id, dir.join("a.png").display().to_string());
        assert_eq!(ranking.skipped.len(), 1);
        assert_eq!(ranking.skipped[0].id, dir.join("b.png").display().to_string());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_batch_falls_back_to_single_images() {
        let dir = scratch_dir("fallback");
        write_png(&dir, "a.png", [0, 0, 255]);
        write_png(&dir, "b.png", [0, 0, 10]);
        write_png(&dir, "c.png", [0, 0, 100]);

        let paths = cliclip_scan::find_images(&dir, false).unwrap();
        let mut provider = ColorProvider::new();
        provider.fail_batches = true;

        let candidates = embed_images(&mut provider, &paths, 2, false);

        assert_eq!(candidates.len(), 3);
        assert_eq!(provider.batch_calls, 2);
        assert_eq!(provider.single_calls, 3);
        let order: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let expected: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        assert_eq!(order, expected.iter().map(String::as_str).collect::<Vec<_>>());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unknown_prompt_is_an_error() {
        let mut provider = ColorProvider::new();
        let err = rank_images(&mut provider, "purple", &[], &options(1, 1)).unwrap_err();
        assert!(format!("{err:?}").contains("failed to encode prompt"));
    }

    fn sample_results() -> Vec<cliclip_core::RankedResult> {
        vec![
            cliclip_core::RankedResult {
                rank: 1,
                id: "imgs/cat.jpg".into(),
                score: 31.256,
            },
            cliclip_core::RankedResult {
                rank: 2,
                id: "imgs/dog.png".into(),
                score: 24.5,
            },
        ]
    }

    #[test]
    fn test_render_paths_only() {
        let out = render_results(&sample_results(), false, false).unwrap();
        assert_eq!(out, "imgs/cat.jpg\nimgs/dog.png\n");
    }

    #[test]
    fn test_render_with_scores() {
        let out = render_results(&sample_results(), true, false).unwrap();
        assert_eq!(
            out,
            "Rank 1: imgs/cat.jpg (score: 31.26)\nRank 2: imgs/dog.png (score: 24.50)\n"
        );
    }

    #[test]
    fn test_render_json() {
        let out = render_results(&sample_results(), false, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["rank"], 1);
        assert_eq!(value[0]["path"], "imgs/cat.jpg");
        assert_eq!(value[1]["path"], "imgs/dog.png");
        assert!((value[1]["score"].as_f64().unwrap() - 24.5).abs() < 1e-6);
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_results(&[], true, false).unwrap(), "");
        assert_eq!(render_results(&[], false, false).unwrap(), "");
        assert_eq!(render_results(&[], false, true).unwrap(), "[]\n");
    }

    #[test]
    fn test_top_zero_renders_nothing() {
        let dir = scratch_dir("top-zero");
        write_png(&dir, "red.png", [255, 0, 0]);

        let paths = cliclip_scan::find_images(&dir, false).unwrap();
        let mut provider = ColorProvider::new();
        let ranking = rank_images(&mut provider, "red", &paths, &options(0, 8)).unwrap();

        assert!(ranking.results.is_empty());
        assert_eq!(render_results(&ranking.results, true, false).unwrap(), "");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_undecodable_images_render_nothing() {
        let dir = scratch_dir("all-broken");
        std::fs::write(dir.join("a.png"), b"not an image").unwrap();
        std::fs::write(dir.join("b.jpg"), b"also not an image").unwrap();

        let paths = cliclip_scan::find_images(&dir, false).unwrap();
        let mut provider = ColorProvider::new();
        let ranking = rank_images(&mut provider, "red", &paths, &options(15, 8)).unwrap();

        assert!(ranking.results.is_empty());
        assert_eq!(provider.batch_calls, 0);
        assert_eq!(render_results(&ranking.results, false, false).unwrap(), "");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["cliclip", "-d", "photos", "-p", "a cat"]).unwrap();
        assert_eq!(args.top, 15);
        assert!(!args.score);
        assert!(!args.json);
        assert_eq!(args.batch_size.get(), 8);
        assert!(args.model_dir.is_none());
    }

    #[test]
    fn test_args_require_directory_and_prompt() {
        assert!(Args::try_parse_from(["cliclip", "-p", "a cat"]).is_err());
        assert!(Args::try_parse_from(["cliclip", "-d", "photos"]).is_err());
        assert!(
            Args::try_parse_from(["cliclip", "-d", "x", "-p", "y", "--batch-size", "0"]).is_err()
        );
    }
}
