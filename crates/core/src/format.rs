use crate::{contexts::Outcome, types::Transcript};

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

/// Format transcript segments with timestamps
pub fn format_transcript_with_timestamps(transcript: &Transcript) -> String {
    transcript
        .segments()
        .iter()
        .map(|seg| format!("[{}] {}", format_timestamp(seg.start_seconds), seg.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_outcome_readable(outcome: &Outcome) -> String {
    let mut output = String::new();
    if let Some(title) = outcome.video.title.as_deref().filter(|t| !t.is_empty()) {
        output.push_str(&format!("# {}\n\n", title));
    }

    let mut meta = Vec::new();
    if let Some(author) = outcome.video.author.as_deref().filter(|a| !a.is_empty()) {
        meta.push(format!("**Author:** {}", author));
    }
    if let Some(length) = outcome.video.duration_seconds {
        meta.push(format!("**Length:** {}", format_timestamp(length as f64)));
    }
    if !meta.is_empty() {
        output.push_str(&meta.join(" | "));
        output.push_str("\n\n");
    }

    output.push_str("## Summary\n\n");
    output.push_str(outcome.summary.trim());
    output.push_str("\n\n");
    output.push_str(&format!("_{}_\n", outcome.info));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SubtitleSegment, VideoContext};

    #[test]
    fn timestamps_are_minutes_and_seconds() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(61.9), "01:01");
        assert_eq!(format_timestamp(3600.0), "60:00");
    }

    #[test]
    fn transcript_lines_carry_their_start() {
        let transcript = Transcript::new(
            "english",
            "English",
            vec![
                SubtitleSegment {
                    start_seconds: 0.5,
                    duration_seconds: 1.0,
                    text: "first".into(),
                },
                SubtitleSegment {
                    start_seconds: 75.0,
                    duration_seconds: 1.0,
                    text: "second".into(),
                },
            ],
        );
        assert_eq!(
            format_transcript_with_timestamps(&transcript),
            "[00:00] first\n[01:15] second"
        );
    }

    #[test]
    fn readable_outcome_skips_unknown_metadata() {
        let outcome = Outcome {
            summary: " the gist \n".into(),
            info: "Source: Web Speech (30s) | Recognized text length: 5 characters".into(),
            video: VideoContext {
                title: Some("Talk".into()),
                duration_seconds: Some(125),
                ..Default::default()
            },
            transcript: None,
        };
        let text = format_outcome_readable(&outcome);
        assert!(text.starts_with("# Talk\n\n**Length:** 02:05\n\n## Summary\n\nthe gist\n\n"));
        assert!(!text.contains("Author"));
        assert!(text.ends_with("characters_\n"));
    }
}
