//! Container image reference helpers

/// Strip a trailing `@digest`
fn without_digest(image: &str) -> &str {
    image.split_once('@').map_or(image, |(name, _)| name)
}

/// Split into (repository, tag). The tag is the text after the last ':' that
/// follows the last '/', so registry ports are not mistaken for tags.
fn split_tag(image: &str) -> (&str, Option<&str>) {
    let image = without_digest(image);
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&image[..colon], Some(&image[colon + 1..]))
        }
        None => (image, None),
    }
}

pub fn image_tag(image: &str) -> Option<&str> {
    split_tag(image).1.filter(|t| !t.is_empty())
}

pub fn image_repository(image: &str) -> &str {
    split_tag(image).0
}

/// Same repository, new tag
pub fn with_tag(image: &str, tag: &str) -> String {
    format!("{}:{}", image_repository(image), tag)
}

/// A version names an image either by the whole reference or by its tag
pub fn matches_version(image: &str, version: &str) -> bool {
    image == version || image_tag(image) == Some(version)
}
