//! Final file set assembly

use kiln_agent::{BACKEND_ENTRYPOINT, FRONTEND_PATH};
use kiln_core::{BuildId, ImageRef, Plan};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

pub const README_PATH: &str = "README.md";

fn placeholder_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://(?:via\.placeholder\.com|placehold\.co|placeholder\.com)[^\s"'()<>]*"#).unwrap()
    })
}

/// Replace placeholder image URLs with generated ones, in document order
///
/// Placeholders beyond the number of images cycle through the list again.
/// Without images the document is returned unchanged.
pub fn inject_images(html: &str, images: &[ImageRef]) -> String {
    if images.is_empty() {
        return html.to_string();
    }
    let mut next = 0;
    placeholder_url()
        .replace_all(html, |_: &Captures| {
            let url = images[next % images.len()].url.clone();
            next += 1;
            url
        })
        .into_owned()
}

/// README describing the generated project
pub fn generate_readme(build_id: BuildId, plan: &Plan, files: &BTreeMap<String, String>) -> String {
    Readme { build_id, plan, files }.to_string()
}

struct Readme<'a> {
    build_id: BuildId,
    plan: &'a Plan,
    files: &'a BTreeMap<String, String>,
}

impl fmt::Display for Readme<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan;
        writeln!(f, "# {}\n", plan.project_name)?;
        if !plan.tagline.is_empty() {
            writeln!(f, "> {}\n", plan.tagline)?;
        }
        if !plan.description.is_empty() {
            writeln!(f, "{}\n", plan.description)?;
        }

        if !plan.features.is_empty() {
            writeln!(f, "## Features\n")?;
            for feature in &plan.features {
                if feature.description.is_empty() {
                    writeln!(f, "- {}", feature.name)?;
                } else {
                    writeln!(f, "- **{}**: {}", feature.name, feature.description)?;
                }
            }
            writeln!(f)?;
        }

        writeln!(f, "## Files\n")?;
        for path in self.files.keys() {
            writeln!(f, "- `{}`", path)?;
        }
        writeln!(f)?;

        writeln!(f, "## Running\n")?;
        if self.files.contains_key(FRONTEND_PATH) {
            writeln!(f, "Open `{}` in a browser.\n", FRONTEND_PATH)?;
        }
        if self.files.contains_key(BACKEND_ENTRYPOINT) {
            writeln!(
                f,
                "```sh\npip install -r backend/requirements.txt\nuvicorn backend.server:app --reload\n```\n"
            )?;
        }

        writeln!(f, "---\nGenerated by Kiln (build {})", self.build_id.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str) -> ImageRef {
        ImageRef {
            url: url.to_string(),
            kind: "hero".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_inject_images_in_order() {
        let html = r#"<img src="https://via.placeholder.com/1920x1080"><img src='https://placehold.co/600x400?text=x'><img src="https://placeholder.com/a">"#;
        let out = inject_images(html, &[image("https://cdn/a.png"), image("https://cdn/b.png")]);
        assert_eq!(
            out,
            r#"<img src="https://cdn/a.png"><img src='https://cdn/b.png'><img src="https://cdn/a.png">"#
        );
    }

    #[test]
    fn test_inject_without_images_is_identity() {
        let html = r#"<img src="https://via.placeholder.com/10">"#;
        assert_eq!(inject_images(html, &[]), html);
    }

    #[test]
    fn test_inject_leaves_real_urls() {
        let html = r#"<img src="https://example.com/photo.jpg">"#;
        assert_eq!(inject_images(html, &[image("https://cdn/a.png")]), html);
    }

    #[test]
    fn test_readme_lists_files_and_backend() {
        let mut files = BTreeMap::new();
        files.insert(FRONTEND_PATH.to_string(), String::new());
        files.insert(BACKEND_ENTRYPOINT.to_string(), String::new());
        let plan = Plan::fallback("sunrise bakery");

        let readme = generate_readme(BuildId::new(), &plan, &files);
        assert!(readme.starts_with("# Sunrise Bakery\n"));
        assert!(readme.contains("- `backend/server.py`"));
        assert!(readme.contains("uvicorn backend.server:app"));
        assert!(readme.contains("Responsive Design"));
    }
}
