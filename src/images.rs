//! # Image Vector
//!
//! Container images deployed by the extension. Every image has a built-in
//! default that can be overridden with an `IMAGE_<NAME>` environment variable,
//! e.g. `IMAGE_FLUENT_BIT=fluent/fluent-bit:3.0.0`.

use std::collections::BTreeMap;

use thiserror::Error;

pub const AUDITTAILER_IMAGE: &str = "audittailer";
pub const FLUENT_BIT_IMAGE: &str = "fluent-bit";
pub const AUDIT_FORWARDER_IMAGE: &str = "audit-forwarder";

const DEFAULT_IMAGES: [(&str, &str); 3] = [
    (AUDITTAILER_IMAGE, "ghcr.io/fi-ts/audittailer:v0.4.0"),
    (FLUENT_BIT_IMAGE, "fluent/fluent-bit:2.1.10"),
    (AUDIT_FORWARDER_IMAGE, "ghcr.io/metal-stack/audit-forwarder:latest"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image {0} not found in image vector")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageVector {
    images: BTreeMap<String, String>,
}

impl Default for ImageVector {
    fn default() -> Self {
        Self {
            images: DEFAULT_IMAGES
                .iter()
                .map(|(name, image)| (name.to_string(), image.to_string()))
                .collect(),
        }
    }
}

impl ImageVector {
    /// An empty vector; every lookup fails
    pub fn empty() -> Self {
        Self {
            images: BTreeMap::new(),
        }
    }

    /// Defaults with `IMAGE_<NAME>` overrides from the environment
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (name, image) in &mut self.images {
            if let Some(value) = lookup(&env_key(name)).filter(|v| !v.trim().is_empty()) {
                *image = value.trim().to_string();
            }
        }
        self
    }

    #[must_use]
    pub fn with_image(mut self, name: impl Into<String>, image: impl Into<String>) -> Self {
        self.images.insert(name.into(), image.into());
        self
    }

    pub fn find_image(&self, name: &str) -> Result<&str, ImageError> {
        self.images
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ImageError::NotFound(name.to_string()))
    }
}

fn env_key(name: &str) -> String {
    format!("IMAGE_{}", name.to_uppercase().replace('-', "_"))
}
