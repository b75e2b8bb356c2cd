//! In-memory WAV encoding for uploads

use std::io::Cursor;
use voice_bridge_core::AudioFrame;

use crate::LlmError;

/// Encode a frame as a 16-bit mono WAV file
pub fn encode_wav(frame: &AudioFrame) -> Result<Vec<u8>, LlmError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: frame.sample_rate.as_u32(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + frame.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| LlmError::InvalidResponse(format!("WAV header: {}", e)))?;
        for &sample in frame.samples.iter() {
            writer
                .write_sample(sample)
                .map_err(|e| LlmError::InvalidResponse(format!("WAV write: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| LlmError::InvalidResponse(format!("WAV finalize: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_bridge_core::SampleRate;

    #[test]
    fn test_wav_header_and_payload() {
        let frame = AudioFrame::new(vec![1, -2, 300, -400], SampleRate::Hz16000, 0);
        let bytes = encode_wav(&frame).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 8);

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 300, -400]);
    }
}
