use rand::seq::SliceRandom;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::context::AppContext;
use crate::notify::{ContentPost, NotifyError};

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Supplies posts for the channel. Generating the material itself happens elsewhere.
pub trait ContentSource: Send + Sync {
    fn next_post(&self) -> Result<Option<ContentPost>, ContentError>;
}

/// Picks a random `*.txt` caption from a directory, with the same-stem `*.png` attached
/// when one exists.
#[derive(Debug, Clone)]
pub struct DirectoryContentSource {
    dir: PathBuf,
}

impl DirectoryContentSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn captions(&self) -> Result<Vec<PathBuf>, ContentError> {
        let mut captions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && has_extension(&path, "txt") {
                captions.push(path);
            }
        }
        Ok(captions)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

impl ContentSource for DirectoryContentSource {
    fn next_post(&self) -> Result<Option<ContentPost>, ContentError> {
        let captions = self.captions()?;
        let Some(chosen) = captions.choose(&mut rand::thread_rng()) else {
            return Ok(None);
        };
        let caption = fs::read_to_string(chosen)?.trim().to_string();
        if caption.is_empty() {
            debug!("skipping empty caption {}", chosen.display());
            return Ok(None);
        }
        let image_path = chosen.with_extension("png");
        let image = if image_path.is_file() {
            Some(fs::read(&image_path)?)
        } else {
            None
        };
        Ok(Some(ContentPost { caption, image }))
    }
}

/// Post the next piece of content, if a source is configured and has anything to offer.
pub async fn post_next(ctx: &AppContext) -> Result<bool, ContentError> {
    let Some(source) = &ctx.content else {
        return Ok(false);
    };
    let Some(post) = source.next_post()? else {
        info!("content source is empty; nothing posted");
        return Ok(false);
    };
    ctx.notifier.post_content(&post).await?;
    info!(
        "posted content to channel (image attached: {})",
        post.image.is_some()
    );
    Ok(true)
}
