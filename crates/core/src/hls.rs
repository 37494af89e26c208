//! Minimal HLS media playlist model.
//!
//! Only what the packager emits is understood: `#EXTINF` segment entries,
//! `#EXT-X-TARGETDURATION` and `#EXT-X-ENDLIST`. Everything else is ignored.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("invalid #EXTINF duration on line {line}: {value}")]
    InvalidDuration { line: usize, value: String },

    #[error("#EXTINF on line {line} is not followed by a segment URI")]
    DanglingSegment { line: usize },

    #[error("playlist has no segments")]
    Empty,

    #[error("playlist is not terminated with #EXT-X-ENDLIST")]
    NotTerminated,

    #[error("segment file missing: {0}")]
    MissingSegment(String),

    #[error("playlist covers {actual:.3}s but the video is {expected:.3}s (tolerance {tolerance:.3}s)")]
    DurationMismatch {
        actual: f64,
        expected: f64,
        tolerance: f64,
    },
}

/// One media segment entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub duration_secs: f64,
    pub uri: String,
}

/// Parsed media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: Option<u64>,
    pub segments: Vec<Segment>,
    pub ended: bool,
}

impl MediaPlaylist {
    pub fn parse(text: &str) -> Result<Self, PlaylistError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        match lines.next() {
            Some((_, "#EXTM3U")) => {}
            _ => return Err(PlaylistError::MissingHeader),
        }

        let mut playlist = MediaPlaylist {
            target_duration: None,
            segments: Vec::new(),
            ended: false,
        };
        let mut pending: Option<(usize, f64)> = None;

        for (line_no, line) in lines {
            if let Some(rest) = line.strip_prefix("#EXTINF:") {
                if let Some((line, _)) = pending {
                    return Err(PlaylistError::DanglingSegment { line });
                }
                let value = rest.split(',').next().unwrap_or_default().trim();
                let duration = value
                    .parse::<f64>()
                    .ok()
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .ok_or_else(|| PlaylistError::InvalidDuration {
                        line: line_no,
                        value: value.to_string(),
                    })?;
                pending = Some((line_no, duration));
            } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = rest.trim().parse().ok();
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            } else if line.starts_with('#') {
                continue;
            } else if let Some((_, duration_secs)) = pending.take() {
                playlist.segments.push(Segment {
                    duration_secs,
                    uri: line.to_string(),
                });
            }
        }

        if let Some((line, _)) = pending {
            return Err(PlaylistError::DanglingSegment { line });
        }

        Ok(playlist)
    }

    /// Read and parse a playlist file.
    pub async fn load(path: &Path) -> Result<Self, PlaylistLoadError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&text)?)
    }

    /// Sum of all segment durations.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_secs).sum()
    }

    pub fn segment_uris(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.uri.as_str())
    }

    /// Check that the playlist is a complete VOD listing covering
    /// `expected_secs` within one `segment_secs` of tolerance, and that
    /// every segment exists in `dir`.
    pub fn verify(&self, dir: &Path, expected_secs: f64, segment_secs: f64) -> Result<(), PlaylistError> {
        if self.segments.is_empty() {
            return Err(PlaylistError::Empty);
        }
        if !self.ended {
            return Err(PlaylistError::NotTerminated);
        }
        for uri in self.segment_uris() {
            if !dir.join(uri).is_file() {
                return Err(PlaylistError::MissingSegment(uri.to_string()));
            }
        }
        let actual = self.total_duration();
        if (actual - expected_secs).abs() > segment_secs {
            return Err(PlaylistError::DurationMismatch {
                actual,
                expected: expected_secs,
                tolerance: segment_secs,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaylistLoadError {
    #[error("failed to read playlist: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] PlaylistError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TEN_SECONDS: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-PLAYLIST-TYPE:VOD
#EXTINF:4.000000,
result_a_000.ts
#EXTINF:4.000000,
result_a_001.ts
#EXTINF:2.000000,
result_a_002.ts
#EXT-X-ENDLIST
";

    #[test]
    fn parses_packager_output() {
        let playlist = MediaPlaylist::parse(TEN_SECONDS).unwrap();
        assert_eq!(playlist.target_duration, Some(4));
        assert!(playlist.ended);
        assert_eq!(
            playlist.segment_uris().collect::<Vec<_>>(),
            vec!["result_a_000.ts", "result_a_001.ts", "result_a_002.ts"]
        );
        assert!((playlist.total_duration() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_missing_header() {
        assert_matches!(
            MediaPlaylist::parse("#EXTINF:4,\na.ts\n"),
            Err(PlaylistError::MissingHeader)
        );
    }

    #[test]
    fn rejects_bad_duration() {
        assert_matches!(
            MediaPlaylist::parse("#EXTM3U\n#EXTINF:abc,\na.ts\n"),
            Err(PlaylistError::InvalidDuration { line: 2, .. })
        );
    }

    #[test]
    fn rejects_extinf_without_uri() {
        assert_matches!(
            MediaPlaylist::parse("#EXTM3U\n#EXTINF:4,\n#EXT-X-ENDLIST\n"),
            Err(PlaylistError::DanglingSegment { line: 2 })
        );
    }

    fn write_segments(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"ts").unwrap();
        }
    }

    #[test]
    fn verify_accepts_duration_within_one_segment() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), &["result_a_000.ts", "result_a_001.ts", "result_a_002.ts"]);
        let playlist = MediaPlaylist::parse(TEN_SECONDS).unwrap();

        assert!(playlist.verify(dir.path(), 10.0, 4.0).is_ok());
        assert!(playlist.verify(dir.path(), 13.5, 4.0).is_ok());
        assert_matches!(
            playlist.verify(dir.path(), 15.0, 4.0),
            Err(PlaylistError::DurationMismatch { .. })
        );
    }

    #[test]
    fn verify_requires_every_segment_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), &["result_a_000.ts", "result_a_002.ts"]);
        let playlist = MediaPlaylist::parse(TEN_SECONDS).unwrap();

        assert_matches!(
            playlist.verify(dir.path(), 10.0, 4.0),
            Err(PlaylistError::MissingSegment(uri)) if uri == "result_a_001.ts"
        );
    }

    #[test]
    fn verify_requires_endlist() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), &["a.ts"]);
        let playlist = MediaPlaylist::parse("#EXTM3U\n#EXTINF:4,\na.ts\n").unwrap();
        assert_matches!(
            playlist.verify(dir.path(), 4.0, 4.0),
            Err(PlaylistError::NotTerminated)
        );
    }
}
