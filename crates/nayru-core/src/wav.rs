//! WAV encoding and decoding.
//!
//! Pure functions — no I/O, no async runtime. The decoder tolerates the
//! `0xFFFFFFFF` sentinel sizes that streaming upstreams write into chunked
//! responses (total size unknown at header time).

/// Decoded PCM16 audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved signed 16-bit samples.
    pub samples: Vec<i16>,
}

/// Parsed WAV header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset in the buffer where raw PCM data begins.
    pub data_offset: usize,
    /// Byte length of the PCM data, already clamped to the buffer and with
    /// sentinel sizes resolved.
    pub data_len: usize,
}

/// Parse a WAV header from a byte buffer.
///
/// Only uncompressed PCM is accepted. Unknown chunks are skipped; a
/// `0xFFFFFFFF` chunk size is treated as "rest of buffer".
pub fn parse_wav_header(buf: &[u8]) -> Result<WavHeader, &'static str> {
    if buf.len() < 12 {
        return Err("too short for RIFF header");
    }
    if &buf[0..4] != b"RIFF" {
        return Err("missing RIFF tag");
    }
    if &buf[8..12] != b"WAVE" {
        return Err("missing WAVE tag");
    }

    let mut pos = 12;
    let mut channels: Option<u16> = None;
    let mut sample_rate: Option<u32> = None;
    let mut bits_per_sample: Option<u16> = None;

    while pos + 8 <= buf.len() {
        let chunk_id = &buf[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);

        if chunk_id == b"fmt " {
            if pos + 24 > buf.len() {
                return Err("fmt chunk truncated");
            }
            let audio_format = u16::from_le_bytes([buf[pos + 8], buf[pos + 9]]);
            if audio_format != 1 {
                return Err("not PCM format");
            }
            channels = Some(u16::from_le_bytes([buf[pos + 10], buf[pos + 11]]));
            sample_rate = Some(u32::from_le_bytes([
                buf[pos + 12],
                buf[pos + 13],
                buf[pos + 14],
                buf[pos + 15],
            ]));
            bits_per_sample = Some(u16::from_le_bytes([buf[pos + 22], buf[pos + 23]]));

            let skip = if chunk_size == 0xFFFFFFFF {
                16 // standard fmt chunk payload
            } else {
                chunk_size as usize
            };
            pos += 8 + skip;
            continue;
        }

        if chunk_id == b"data" {
            let ch = channels.ok_or("data chunk before fmt chunk")?;
            let sr = sample_rate.ok_or("data chunk before fmt chunk")?;
            let bps = bits_per_sample.ok_or("data chunk before fmt chunk")?;
            let data_offset = pos + 8;
            let available = buf.len() - data_offset;
            let data_len = if chunk_size == 0xFFFFFFFF {
                available
            } else {
                (chunk_size as usize).min(available)
            };
            return Ok(WavHeader {
                channels: ch,
                sample_rate: sr,
                bits_per_sample: bps,
                data_offset,
                data_len,
            });
        }

        // Skip unknown chunks
        let skip = if chunk_size == 0xFFFFFFFF {
            0
        } else {
            chunk_size as usize
        };
        pos += 8 + skip;
    }

    Err("data chunk not found")
}

/// Decode a complete WAV buffer into PCM16 samples.
///
/// Accepts mono or stereo 16-bit PCM at any sample rate. An odd trailing
/// byte (truncated stream) is dropped.
pub fn decode_wav(buf: &[u8]) -> Result<WavAudio, &'static str> {
    let hdr = parse_wav_header(buf)?;
    if hdr.bits_per_sample != 16 {
        return Err("unsupported bits per sample");
    }
    if hdr.channels == 0 || hdr.channels > 2 {
        return Err("unsupported channel count");
    }
    if hdr.sample_rate == 0 {
        return Err("zero sample rate");
    }

    let data = &buf[hdr.data_offset..hdr.data_offset + hdr.data_len];
    let mut samples = Vec::with_capacity(data.len() / 2);
    for pair in data.chunks_exact(2) {
        samples.push(i16::from_le_bytes([pair[0], pair[1]]));
    }

    Ok(WavAudio {
        sample_rate: hdr.sample_rate,
        channels: hdr.channels,
        samples,
    })
}

/// Byte length of the header emitted by [`write_wav`].
const HEADER_LEN: usize = 44;

/// Write a minimal WAV file (16-bit mono PCM) from raw samples.
pub fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let mut out = Vec::with_capacity(HEADER_LEN + data_len);

    out.extend_from_slice(b"RIFF");
    put_u32(&mut out, (HEADER_LEN - 8 + data_len) as u32);
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    put_u32(&mut out, 16); // fmt payload size
    put_u16(&mut out, 1); // PCM
    put_u16(&mut out, 1); // mono
    put_u32(&mut out, sample_rate);
    put_u32(&mut out, sample_rate * 2); // byte rate
    put_u16(&mut out, 2); // block align
    put_u16(&mut out, 16); // bits per sample

    out.extend_from_slice(b"data");
    put_u32(&mut out, data_len as u32);
    for &sample in samples {
        put_u16(&mut out, sample as u16);
    }

    out
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Fix WAV buffers with indeterminate sizes (`0xFFFFFFFF`).
///
/// Streaming upstreams write the sentinel for the RIFF and `data` chunk
/// sizes. Once the full response is buffered the real sizes are known.
pub fn fix_wav_sizes(mut wav: Vec<u8>) -> Vec<u8> {
    if wav.len() < HEADER_LEN || &wav[0..4] != b"RIFF" {
        return wav;
    }

    let riff_size = (wav.len() - 8) as u32;
    wav[4..8].copy_from_slice(&riff_size.to_le_bytes());

    if let Some(pos) = find_chunk(&wav, b"data") {
        let data_size = (wav.len() - pos - 8) as u32;
        wav[pos + 4..pos + 8].copy_from_slice(&data_size.to_le_bytes());
    }

    wav
}

/// Byte offset of the header of the sub-chunk with the given id.
fn find_chunk(wav: &[u8], id: &[u8; 4]) -> Option<usize> {
    let mut pos = 12; // past "RIFF" + size + "WAVE"
    while pos + 8 <= wav.len() {
        if &wav[pos..pos + 4] == id {
            return Some(pos);
        }
        let declared =
            u32::from_le_bytes([wav[pos + 4], wav[pos + 5], wav[pos + 6], wav[pos + 7]]);
        // A sentinel size cannot be trusted for skipping.
        let skip = if declared == 0xFFFFFFFF {
            0
        } else {
            declared as usize
        };
        pos += 8 + skip;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_wav_produces_valid_header() {
        let samples = vec![0i16; 100];
        let wav = write_wav(&samples, 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(wav.len(), 44 + 200); // 44 header + 100 samples * 2 bytes
    }

    #[test]
    fn parse_wav_header_basic() {
        let wav = write_wav(&vec![0i16; 50], 24000);
        let hdr = parse_wav_header(&wav).unwrap();
        assert_eq!(hdr.channels, 1);
        assert_eq!(hdr.sample_rate, 24000);
        assert_eq!(hdr.bits_per_sample, 16);
        assert_eq!(hdr.data_offset, 44);
        assert_eq!(hdr.data_len, 100);
    }

    #[test]
    fn parse_wav_header_sentinel_sizes() {
        let mut wav = write_wav(&vec![0i16; 50], 24000);
        wav[4..8].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        // data chunk size at offset 40
        wav[40..44].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        let hdr = parse_wav_header(&wav).unwrap();
        assert_eq!(hdr.sample_rate, 24000);
        assert_eq!(hdr.data_offset, 44);
        assert_eq!(hdr.data_len, 100);
    }

    #[test]
    fn parse_wav_header_too_short() {
        assert!(parse_wav_header(b"RIFF").is_err());
    }

    #[test]
    fn parse_wav_header_not_riff() {
        let mut wav = write_wav(&vec![0i16; 10], 16000);
        wav[0..4].copy_from_slice(b"NOPE");
        assert!(parse_wav_header(&wav).is_err());
    }

    #[test]
    fn decode_round_trip() {
        let samples: Vec<i16> = (0..200).map(|i| (i * 7) as i16).collect();
        let wav = write_wav(&samples, 24000);
        let audio = decode_wav(&wav).unwrap();
        assert_eq!(audio.sample_rate, 24000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.samples, samples);
    }

    #[test]
    fn decode_rejects_non_pcm() {
        let mut wav = write_wav(&vec![0i16; 10], 16000);
        // audio format field at offset 20
        wav[20..22].copy_from_slice(&3u16.to_le_bytes());
        assert!(decode_wav(&wav).is_err());
    }

    #[test]
    fn decode_rejects_wrong_bit_depth() {
        let mut wav = write_wav(&vec![0i16; 10], 16000);
        // bits per sample at offset 34
        wav[34..36].copy_from_slice(&8u16.to_le_bytes());
        assert!(decode_wav(&wav).is_err());
    }

    #[test]
    fn decode_truncated_data_drops_odd_byte() {
        let mut wav = write_wav(&vec![1i16; 50], 16000);
        wav.pop(); // stream cut mid-sample
        let audio = decode_wav(&wav).unwrap();
        assert_eq!(audio.samples.len(), 49);
    }

    #[test]
    fn fix_wav_sizes_patches_sentinel() {
        let mut wav = write_wav(&vec![0i16; 50], 16000);
        wav[4..8].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        let fixed = fix_wav_sizes(wav);
        let riff_size = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        assert_eq!(riff_size, (fixed.len() - 8) as u32);
    }

    #[test]
    fn fix_wav_sizes_noop_on_good_wav() {
        let wav = write_wav(&vec![0i16; 50], 16000);
        let fixed = fix_wav_sizes(wav.clone());
        assert_eq!(wav, fixed);
    }

    #[test]
    fn decode_sentinel_sized_stream() {
        let samples = vec![42i16; 80];
        let mut wav = write_wav(&samples, 24000);
        wav[4..8].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        wav[40..44].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        let audio = decode_wav(&fix_wav_sizes(wav)).unwrap();
        assert_eq!(audio.samples, samples);
    }
}
