//! Blog posts as stored in the site repository.
//!
//! A post file is a JSON front matter object, one newline, and the Markdown
//! body:
//!
//! ```text
//! {
//!     "title": "Hello, World! #1",
//!     "date": "2024-03-01T09:30:00-05:00",
//!     "tags": [
//!         "rust"
//!     ]
//! }
//! # Body starts here
//! ```

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Directory, relative to the repository root, holding post files.
pub const CONTENT_DIR: &str = "content/post";

/// File extension of post files.
pub const EXTENSION: &str = "md";

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum PostError {
    #[error("post does not start with a JSON front matter object")]
    MissingFrontMatter,

    #[error("front matter object is never closed")]
    UnterminatedFrontMatter,

    #[error("ambiguous front matter boundary: stray '}}' at byte {offset} of the post body")]
    AmbiguousBoundary { offset: usize },

    #[error("invalid front matter JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Front matter
// =============================================================================

/// Metadata block at the top of every post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Set when the post is first created and carried over by every update.
    pub date: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Cover image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
}

impl FrontMatter {
    /// Tags joined with single spaces, the same shape the upload form takes.
    pub fn tag_list(&self) -> String {
        self.tags.join(" ")
    }
}

// =============================================================================
// Post
// =============================================================================

/// Operator-supplied metadata for a new or updated post.
#[derive(Debug, Clone, Default)]
pub struct PostInput {
    pub title: String,
    /// Whitespace-separated tags
    pub tags: String,
    pub summary: String,
    pub author: String,
}

/// A post: front matter plus normalized Markdown content.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub front_matter: FrontMatter,
    pub content: Vec<u8>,
}

impl Post {
    /// Build a post from converted content and form input.
    ///
    /// Empty summary and author are left out of the front matter.
    pub fn new(content: Vec<u8>, input: &PostInput, date: DateTime<FixedOffset>) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            front_matter: FrontMatter {
                title: input.title.clone(),
                author: non_empty(&input.author),
                date,
                summary: non_empty(&input.summary),
                tags: input.tags.split_whitespace().map(str::to_string).collect(),
                img: None,
            },
            content,
        }
    }

    /// Serialize to the on-disk form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PostError> {
        let mut buf = Vec::with_capacity(256 + self.content.len());
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.front_matter.serialize(&mut ser)?;
        buf.push(b'\n');
        buf.extend_from_slice(&self.content);
        Ok(buf)
    }

    /// Parse the on-disk form.
    pub fn parse(bytes: &[u8]) -> Result<Self, PostError> {
        let (json, body) = split_front_matter(bytes)?;
        let front_matter = serde_json::from_slice(json)?;
        Ok(Self {
            front_matter,
            content: body.to_vec(),
        })
    }

    pub fn slug(&self) -> String {
        slugify(&self.front_matter.title)
    }

    /// Repository-relative path of the post file, derived from the title alone.
    pub fn fname(&self) -> String {
        post_path(&self.slug())
    }

    pub fn tag_list(&self) -> String {
        self.front_matter.tag_list()
    }
}

/// Split a post file into its front matter object and body.
///
/// The object ends at the brace closing the outermost `{`, found by a scan that
/// skips over JSON strings. One newline after it belongs to the separator. A
/// `}` in the body that no earlier `{` in the body opened would have closed the
/// object under a naive split, so it is rejected as ambiguous.
fn split_front_matter(bytes: &[u8]) -> Result<(&[u8], &[u8]), PostError> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .filter(|&i| bytes[i] == b'{')
        .ok_or(PostError::MissingFrontMatter)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end.ok_or(PostError::UnterminatedFrontMatter)?;

    let json = &bytes[start..=end];
    let rest = &bytes[end + 1..];
    let body = rest.strip_prefix(b"\n").unwrap_or(rest);

    let mut open = 0usize;
    for (offset, &b) in body.iter().enumerate() {
        match b {
            b'{' => open += 1,
            b'}' if open == 0 => return Err(PostError::AmbiguousBoundary { offset }),
            b'}' => open -= 1,
            _ => {}
        }
    }

    Ok((json, body))
}

/// Derive a slug from a title.
///
/// Lower-cases, drops everything but ASCII letters, digits and whitespace, then
/// turns each whitespace run into one `-`.
/// "Hello, World! #1" -> "hello-world-1"
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.chars() {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
                in_space = true;
            }
        } else if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            in_space = false;
        }
    }
    slug
}

/// Repository-relative path of the post with the given slug.
pub fn post_path(slug: &str) -> String {
    format!("{CONTENT_DIR}/{slug}.{EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-03-01T09:30:00-05:00").unwrap()
    }

    fn sample(content: &str) -> Post {
        Post::new(
            content.as_bytes().to_vec(),
            &PostInput {
                title: "Hello, World! #1".to_string(),
                tags: "rust  blogging ".to_string(),
                summary: "A first post".to_string(),
                author: "Ada".to_string(),
            },
            date(),
        )
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World! #1"), "hello-world-1");
        assert_eq!(slugify("Rust   and\tGit"), "rust-and-git");
        assert_eq!(slugify("a , b"), "a-b");
        assert_eq!(slugify("Café Crème"), "caf-crme");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_fname_depends_only_on_title() {
        let a = sample("one body");
        let mut b = sample("another body");
        b.front_matter.tags.clear();
        b.front_matter.date = DateTime::parse_from_rfc3339("2001-01-01T00:00:00Z").unwrap();
        assert_eq!(a.fname(), "content/post/hello-world-1.md");
        assert_eq!(a.fname(), b.fname());
        assert_eq!(a.slug(), "hello-world-1");
    }

    #[test]
    fn test_new_splits_tags_and_drops_empty_fields() {
        let post = Post::new(
            b"body".to_vec(),
            &PostInput {
                title: "T".to_string(),
                ..Default::default()
            },
            date(),
        );
        assert!(post.front_matter.tags.is_empty());
        assert_eq!(post.front_matter.author, None);
        assert_eq!(post.front_matter.summary, None);
        assert_eq!(post.tag_list(), "");

        let post = sample("body");
        assert_eq!(post.front_matter.tags, vec!["rust", "blogging"]);
        assert_eq!(post.tag_list(), "rust blogging");
    }

    #[test]
    fn test_serialized_layout() {
        let bytes = sample("# Body\n").to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let expected = r#"{
    "title": "Hello, World! #1",
    "author": "Ada",
    "date": "2024-03-01T09:30:00-05:00",
    "summary": "A first post",
    "tags": [
        "rust",
        "blogging"
    ]
}
# Body
"#;
        assert_eq!(text, expected);
    }

    #[test]
    fn test_round_trip() {
        let post = sample("# Body\n\nText with (parens) and [links](x).\n");
        let parsed = Post::parse(&post.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.front_matter, post.front_matter);
        assert_eq!(parsed.content, post.content);
    }

    #[test]
    fn test_round_trip_empty_content() {
        let post = sample("");
        let parsed = Post::parse(&post.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, post);
    }

    #[test]
    fn test_braces_inside_json_strings() {
        let mut post = sample("body\n");
        post.front_matter.title = "Sets like {a, b} and \"quoted }\"".to_string();
        let parsed = Post::parse(&post.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.front_matter.title, post.front_matter.title);
        assert_eq!(parsed.content, b"body\n");
    }

    #[test]
    fn test_balanced_braces_in_body_are_allowed() {
        let post = sample("fn main() { println!(\"hi\"); }\n");
        let parsed = Post::parse(&post.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.content, post.content);
    }

    #[test]
    fn test_stray_brace_is_ambiguous() {
        let post = sample("oops } here");
        let err = Post::parse(&post.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, PostError::AmbiguousBoundary { offset: 5 }));
    }

    #[test]
    fn test_body_starting_with_brace_is_ambiguous() {
        let bytes = b"{\"title\": \"t\", \"date\": \"2024-03-01T09:30:00Z\"}\n}rest";
        assert!(matches!(
            Post::parse(bytes),
            Err(PostError::AmbiguousBoundary { offset: 0 })
        ));
    }

    #[test]
    fn test_parse_accepts_missing_tags() {
        let bytes = b"{\"title\": \"t\", \"date\": \"2024-03-01T09:30:00.123456789Z\"}\nbody";
        let post = Post::parse(bytes).unwrap();
        assert!(post.front_matter.tags.is_empty());
        assert_eq!(post.content, b"body");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Post::parse(b"# no front matter"),
            Err(PostError::MissingFrontMatter)
        ));
        assert!(matches!(Post::parse(b""), Err(PostError::MissingFrontMatter)));
        assert!(matches!(
            Post::parse(b"{\"title\": \"t\""),
            Err(PostError::UnterminatedFrontMatter)
        ));
        assert!(matches!(
            Post::parse(b"{\"title\": 3}\nbody"),
            Err(PostError::Json(_))
        ));
    }

    #[test]
    fn test_post_path() {
        assert_eq!(post_path("my-post"), "content/post/my-post.md");
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn arb_date() -> impl Strategy<Value = DateTime<FixedOffset>> {
        // 1970..2100, whole-minute offsets as RFC 3339 requires
        (0i64..4_102_444_800, 0u32..1_000_000_000, -720i32..=720).prop_map(
            |(secs, nanos, offset_minutes)| {
                let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap();
                DateTime::from_timestamp(secs, nanos)
                    .unwrap()
                    .with_timezone(&offset)
            },
        )
    }

    fn arb_front_matter() -> impl Strategy<Value = FrontMatter> {
        (
            "\\PC{1,40}",
            proptest::option::of("\\PC{0,20}"),
            arb_date(),
            proptest::option::of("\\PC{0,60}"),
            proptest::collection::vec("[a-z0-9-]{1,10}", 0..5),
            proptest::option::of("/img/[a-z0-9]{1,10}\\.png"),
        )
            .prop_map(|(title, author, date, summary, tags, img)| FrontMatter {
                title,
                author,
                date,
                summary,
                tags,
                img,
            })
    }

    proptest! {
        #[test]
        fn round_trip_without_braces_in_body(
            front_matter in arb_front_matter(),
            content in "[^{}]{0,200}",
        ) {
            let post = Post {
                front_matter,
                content: content.into_bytes(),
            };
            let parsed = Post::parse(&post.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(parsed, post);
        }

        #[test]
        fn fname_depends_on_title_alone(
            title in "\\PC{1,40}",
            a in arb_front_matter(),
            b in arb_front_matter(),
            content_a in "\\PC{0,50}",
            content_b in "\\PC{0,50}",
        ) {
            let first = Post {
                front_matter: FrontMatter { title: title.clone(), ..a },
                content: content_a.into_bytes(),
            };
            let second = Post {
                front_matter: FrontMatter { title: title.clone(), ..b },
                content: content_b.into_bytes(),
            };
            prop_assert_eq!(first.fname(), second.fname());
            prop_assert_eq!(first.fname(), post_path(&slugify(&title)));
        }

        #[test]
        fn slug_is_lowercase_ascii_and_dashes(title in "\\PC{0,60}") {
            let slug = slugify(&title);
            prop_assert!(slug
                .chars()
                .all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_lowercase()));
            prop_assert!(!slug.contains("--"));
        }
    }
}
