//! Immutable description of the video a session plays.

use url::Url;

use crate::error::{Result, SessionError};

const ALLOWED_STREAM_SCHEMES: [&str; 3] = ["http", "https", "file"];

/// Metadata identifying one video. Only constructible through [`VideoDescriptor::new`],
/// so every descriptor handed to a controller has a parseable stream URL.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDescriptor {
    title: String,
    album: String,
    duration_s: f64,
    stream_url: Url,
    thumbnail_url: Option<Url>,
    is_live_stream: bool,
}

impl VideoDescriptor {
    /// Validates and builds a descriptor.
    ///
    /// A malformed stream URL is fatal: no engine should ever be built for it.
    /// An unparseable thumbnail URL is only dropped, since it is cosmetic.
    pub fn new(
        title: &str,
        album: &str,
        duration_s: f64,
        stream_url: &str,
        thumbnail_url: &str,
        is_live_stream: bool,
    ) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::InvalidDescriptor(
                "title must not be empty".to_string(),
            ));
        }
        if !duration_s.is_finite() || duration_s < 0.0 {
            return Err(SessionError::InvalidDescriptor(format!(
                "duration must be a finite, non-negative number of seconds (got {duration_s})"
            )));
        }

        let stream_url = parse_stream_url(stream_url)?;
        let thumbnail_url = match thumbnail_url.trim() {
            "" => None,
            raw => match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    log::warn!(
                        "VideoDescriptor: ignoring unparseable thumbnail url '{}': {}",
                        raw,
                        err
                    );
                    None
                }
            },
        };

        Ok(Self {
            title: title.to_string(),
            album: album.trim().to_string(),
            duration_s,
            stream_url,
            thumbnail_url,
            is_live_stream,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    /// Nominal duration in seconds as supplied by the caller.
    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    pub fn thumbnail_url(&self) -> Option<&Url> {
        self.thumbnail_url.as_ref()
    }

    pub fn is_live_stream(&self) -> bool {
        self.is_live_stream
    }

    /// Guesses the container content type from the stream path, for receivers that need one.
    pub fn content_type(&self) -> &'static str {
        let path = self.stream_url.path().to_ascii_lowercase();
        if path.ends_with(".m3u8") {
            "application/x-mpegURL"
        } else if path.ends_with(".mpd") {
            "application/dash+xml"
        } else if path.ends_with(".webm") {
            "video/webm"
        } else {
            "video/mp4"
        }
    }
}

fn parse_stream_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|err| SessionError::InvalidStreamUrl {
        url: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    if !ALLOWED_STREAM_SCHEMES.contains(&url.scheme()) {
        return Err(SessionError::InvalidStreamUrl {
            url: trimmed.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.scheme() != "file" && url.host_str().is_none() {
        return Err(SessionError::InvalidStreamUrl {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::VideoDescriptor;
    use crate::error::SessionError;

    fn build(stream_url: &str) -> Result<VideoDescriptor, SessionError> {
        VideoDescriptor::new(
            "Sintel",
            "Blender Open Movies",
            888.0,
            stream_url,
            "https://cdn.example.com/sintel.jpg",
            false,
        )
    }

    #[test]
    fn test_valid_descriptor_keeps_metadata() {
        let descriptor = build("https://cdn.example.com/sintel/master.m3u8").expect("valid");
        assert_eq!(descriptor.title(), "Sintel");
        assert_eq!(descriptor.album(), "Blender Open Movies");
        assert_eq!(descriptor.duration_s(), 888.0);
        assert_eq!(descriptor.stream_url().host_str(), Some("cdn.example.com"));
        assert!(descriptor.thumbnail_url().is_some());
        assert!(!descriptor.is_live_stream());
        assert_eq!(descriptor.content_type(), "application/x-mpegURL");
    }

    #[test]
    fn test_malformed_stream_url_is_rejected() {
        let result = build("not a url");
        assert!(matches!(result, Err(SessionError::InvalidStreamUrl { .. })));
    }

    #[test]
    fn test_unsupported_scheme_is_rejected() {
        let result = build("ftp://cdn.example.com/movie.mp4");
        assert!(matches!(result, Err(SessionError::InvalidStreamUrl { .. })));
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let result = VideoDescriptor::new("  ", "", 10.0, "https://a.example/v.mp4", "", false);
        assert!(matches!(result, Err(SessionError::InvalidDescriptor(_))));
    }

    #[test]
    fn test_non_finite_duration_is_rejected() {
        let result = VideoDescriptor::new(
            "Clip",
            "",
            f64::NAN,
            "https://a.example/v.mp4",
            "",
            false,
        );
        assert!(matches!(result, Err(SessionError::InvalidDescriptor(_))));
    }

    #[test]
    fn test_bad_thumbnail_is_dropped_not_fatal() {
        let descriptor = VideoDescriptor::new(
            "Clip",
            "",
            10.0,
            "https://a.example/v.mp4",
            "::nope::",
            true,
        )
        .expect("thumbnail is cosmetic");
        assert!(descriptor.thumbnail_url().is_none());
        assert!(descriptor.is_live_stream());
        assert_eq!(descriptor.content_type(), "video/mp4");
    }
}
