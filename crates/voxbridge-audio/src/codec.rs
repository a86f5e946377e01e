//! G.711 mu-law conversion and sample-rate reduction.
//!
//! Synthesis providers return 16-bit linear PCM at a higher rate than the
//! telephone line carries, so outbound audio is resampled down to 8 kHz and
//! companded to 8-bit mu-law before it is relayed.

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// Expands one mu-law byte to a 16-bit linear sample.
pub fn decode_mulaw(mu: u8) -> i16 {
    let mu = !mu;
    let sign = mu & 0x80 != 0;
    let exponent = (mu & 0x70) >> 4;
    let mantissa = mu & 0x0F;

    let magnitude = (((mantissa as i32) << 3) + MULAW_BIAS) << exponent;
    if sign {
        (MULAW_BIAS - magnitude) as i16
    } else {
        (magnitude - MULAW_BIAS) as i16
    }
}

/// Compresses a 16-bit linear sample to one mu-law byte.
pub fn encode_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decodes a mu-law payload into linear samples.
pub fn mulaw_to_samples(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| decode_mulaw(b)).collect()
}

/// Interprets raw bytes as 16-bit little-endian samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16le_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Changes the sample rate of mono linear audio.
///
/// Integer down-sampling ratios (24 kHz -> 8 kHz) average each group of
/// input samples, which doubles as a crude anti-alias filter. Other ratios
/// fall back to linear interpolation.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    if from_rate > to_rate && from_rate % to_rate == 0 {
        let factor = (from_rate / to_rate) as usize;
        return samples
            .chunks(factor)
            .map(|group| {
                let sum: i32 = group.iter().map(|&s| s as i32).sum();
                (sum / group.len() as i32) as i16
            })
            .collect();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = samples[idx.min(samples.len() - 1)] as f64;
            let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Converts 16-bit little-endian mono PCM at `source_rate` to 8 kHz mu-law.
pub fn pcm16le_to_mulaw(bytes: &[u8], source_rate: u32) -> Vec<u8> {
    let samples = pcm16le_to_samples(bytes);
    resample(&samples, source_rate, 8_000)
        .into_iter()
        .map(encode_mulaw)
        .collect()
}
