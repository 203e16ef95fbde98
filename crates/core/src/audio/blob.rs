use std::io::Cursor;

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{audio::ChunkFormat, error::Result};

pub const WEBM_MIME: &str = "audio/webm";
pub const WAV_MIME: &str = "audio/wav";

/// Finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl AudioBlob {
    /// Joins recorder chunks into one file. PCM chunks are wrapped in a WAV
    /// container; encoded chunks are concatenated as they are.
    pub fn assemble(format: &ChunkFormat, chunks: Vec<Vec<u8>>) -> Result<Self> {
        match format {
            ChunkFormat::Encoded { mime_type } => Ok(Self {
                data: chunks.concat(),
                // codec parameters are dropped from the blob type
                mime_type: mime_type
                    .split(';')
                    .next()
                    .unwrap_or(mime_type)
                    .trim()
                    .to_string(),
            }),
            ChunkFormat::Pcm16 {
                sample_rate,
                channels,
            } => {
                let pcm = chunks.concat();
                let spec = hound::WavSpec {
                    channels: *channels,
                    sample_rate: *sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };

                let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
                let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
                for frame in pcm.chunks_exact(2) {
                    writer.write_sample(i16::from_le_bytes([frame[0], frame[1]]))?;
                }
                writer.finalize()?;

                Ok(Self {
                    data: cursor.into_inner(),
                    mime_type: WAV_MIME.to_string(),
                })
            }
        }
    }

    pub fn from_base64(data: &str, mime_type: &str) -> Result<Self> {
        Ok(Self {
            data: STANDARD.decode(data.trim())?,
            mime_type: mime_type.to_string(),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// Upload file name matching the container.
    pub fn file_name(&self) -> &'static str {
        match self.mime_type.as_str() {
            WAV_MIME | "audio/x-wav" | "audio/wave" => "audio.wav",
            "audio/ogg" => "audio.ogg",
            "audio/mpeg" => "audio.mp3",
            "audio/mp4" => "audio.m4a",
            _ => "audio.webm",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_chunks_concatenate() {
        let blob = AudioBlob::assemble(
            &ChunkFormat::Encoded {
                mime_type: "audio/webm;codecs=opus".into(),
            },
            vec![vec![1, 2], vec![3]],
        )
        .unwrap();
        assert_eq!(blob.data, vec![1, 2, 3]);
        assert_eq!(blob.mime_type, WEBM_MIME);
        assert_eq!(blob.file_name(), "audio.webm");
    }

    #[test]
    fn pcm_chunks_become_a_readable_wav() {
        let samples: [i16; 4] = [0, 1000, -1000, i16::MAX];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let (a, b) = bytes.split_at(3);

        let blob = AudioBlob::assemble(
            &ChunkFormat::Pcm16 {
                sample_rate: 16000,
                channels: 1,
            },
            vec![a.to_vec(), b.to_vec()],
        )
        .unwrap();
        assert_eq!(blob.mime_type, WAV_MIME);
        assert_eq!(blob.file_name(), "audio.wav");

        let mut reader = hound::WavReader::new(Cursor::new(blob.data)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn base64_round_trip_keeps_bytes() {
        let blob = AudioBlob {
            data: vec![0, 255, 10],
            mime_type: WEBM_MIME.into(),
        };
        let back = AudioBlob::from_base64(&blob.to_base64(), WEBM_MIME).unwrap();
        assert_eq!(back, blob);
        assert!(AudioBlob::from_base64("***", WEBM_MIME).is_err());
    }
}
