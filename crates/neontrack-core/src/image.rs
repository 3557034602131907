//! Image descriptor resolution for poster and thumbnail events

use crate::{params::basename, ImageDescriptor, Player};

/// Resolves the images an image event is attributed to
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDescriptorResolver;

impl ImageDescriptorResolver {
    /// Explicit images win; otherwise the player's poster, when both its URL
    /// and rendered size are known. An empty result means "cannot attribute".
    pub fn resolve(explicit: Option<&[ImageDescriptor]>, player: &dyn Player) -> Vec<ImageDescriptor> {
        if let Some(images) = explicit {
            return images
                .iter()
                .filter(|image| !image.url.is_empty())
                .cloned()
                .collect();
        }

        match (player.poster_url(), player.poster_size()) {
            (Some(url), Some((width, height))) if !url.is_empty() => {
                vec![ImageDescriptor::new(url, width, height)]
            }
            _ => Vec::new(),
        }
    }

    /// `bns` value: `"<basename> <width> <height>"` per image, comma-joined
    pub fn basenames_with_size(images: &[ImageDescriptor]) -> String {
        images
            .iter()
            .map(|image| format!("{} {} {}", basename(&image.url), image.width, image.height))
            .collect::<Vec<_>>()
            .join(",")
    }
}
