use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CommanderError, CommanderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

pub const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 1024,
    height: 1024,
};

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parses a custom `WxH` string such as `1280x720`.
    pub fn parse_custom(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let (w, h) = lowered.split_once('x')?;
        let width = w.trim().parse::<u32>().ok()?;
        let height = h.trim().parse::<u32>().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }
}

impl Default for Resolution {
    fn default() -> Self {
        DEFAULT_RESOLUTION
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Named format keywords (shape × size tier) mapped to fixed dimensions.
#[derive(Debug, Clone)]
pub struct FormatPresets {
    presets: IndexMap<String, Resolution>,
}

impl Default for FormatPresets {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FormatPresets {
    pub fn new(presets: Option<IndexMap<String, Resolution>>) -> Self {
        Self {
            presets: presets.unwrap_or_else(default_presets),
        }
    }

    pub fn get(&self, keyword: &str) -> Option<Resolution> {
        self.presets.get(keyword).copied()
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// Resolves a format keyword or a custom `WxH` string.
    pub fn resolve(&self, raw: &str) -> CommanderResult<Resolution> {
        let keyword = raw.trim().to_ascii_lowercase();
        if keyword.is_empty() {
            return Err(CommanderError::validation("--format", "empty format"));
        }
        if let Some(resolution) = self.get(&keyword) {
            return Ok(resolution);
        }
        if keyword.contains('x') && keyword.chars().next().is_some_and(|ch| ch.is_ascii_digit())
        {
            return Resolution::parse_custom(&keyword).ok_or_else(|| {
                CommanderError::validation(
                    "--format",
                    format!("malformed resolution '{raw}' (expected WIDTHxHEIGHT, both > 0)"),
                )
            });
        }
        let known = self.keywords().collect::<Vec<&str>>().join(", ");
        Err(CommanderError::validation(
            "--format",
            format!("unknown format '{raw}' (known: {known})"),
        ))
    }

    /// Shortest `--format` argument that resolves back to `resolution`,
    /// `None` for the default size.
    pub fn format_argument(&self, resolution: Resolution) -> Option<String> {
        if resolution == DEFAULT_RESOLUTION {
            return None;
        }
        let keyword = self
            .presets
            .iter()
            .find(|(_, preset)| **preset == resolution)
            .map(|(name, _)| name.clone());
        Some(keyword.unwrap_or_else(|| resolution.to_string()))
    }
}

fn default_presets() -> IndexMap<String, Resolution> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, width: u32, height: u32| {
        map.insert(name.to_string(), Resolution::new(width, height));
    };

    insert("default", 1024, 1024);
    insert("square", 1024, 1024);
    insert("landscape", 1024, 576);
    insert("portrait", 768, 1024);
    insert("square_sm", 512, 512);
    insert("landscape_sm", 512, 288);
    insert("portrait_sm", 384, 512);
    insert("square_lg", 1536, 1536);
    insert("landscape_lg", 1536, 864);
    insert("portrait_lg", 1152, 1536);
    insert("square_xl", 2048, 2048);
    insert("landscape_xl", 2048, 1152);
    insert("portrait_xl", 1536, 2048);

    map
}

#[cfg(test)]
mod tests {
    use super::{FormatPresets, Resolution, DEFAULT_RESOLUTION};

    #[test]
    fn resolves_keywords_and_custom_sizes() -> anyhow::Result<()> {
        let presets = FormatPresets::default();
        assert_eq!(presets.resolve("landscape")?, Resolution::new(1024, 576));
        assert_eq!(presets.resolve("Portrait_LG")?, Resolution::new(1152, 1536));
        assert_eq!(presets.resolve("1280x720")?, Resolution::new(1280, 720));
        Ok(())
    }

    #[test]
    fn rejects_unknown_keyword_and_malformed_sizes() {
        let presets = FormatPresets::default();
        let unknown = presets.resolve("panorama").unwrap_err();
        assert!(unknown.is_validation());
        assert!(unknown.to_string().contains("unknown format 'panorama'"));

        for raw in ["0x512", "512x", "12xab", "1024x0"] {
            let err = presets.resolve(raw).unwrap_err();
            assert!(err.to_string().contains("malformed"), "{raw}: {err}");
        }
    }

    #[test]
    fn format_argument_prefers_keyword() {
        let presets = FormatPresets::default();
        assert_eq!(presets.format_argument(DEFAULT_RESOLUTION), None);
        assert_eq!(
            presets.format_argument(Resolution::new(768, 1024)).as_deref(),
            Some("portrait")
        );
        assert_eq!(
            presets.format_argument(Resolution::new(640, 480)).as_deref(),
            Some("640x480")
        );
    }
}
