use rand::Rng;

/// Exponential backoff with base 500ms, cap 8s, ±20% jitter (§4.3).
pub fn backoff_ms(retry_count: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let exp = base_ms.saturating_mul(1u64 << retry_count.min(16));
    let capped = exp.min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    ((capped as f64) * jitter) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_respects_cap() {
        for retry in 0..10 {
            let ms = backoff_ms(retry, 500, 8000);
            let exp = 500u64.saturating_mul(1u64 << retry).min(8000);
            let lo = (exp as f64 * 0.8) as u64;
            let hi = (exp as f64 * 1.2) as u64 + 1;
            assert!(
                ms >= lo && ms <= hi,
                "retry={retry} ms={ms} expected in [{lo},{hi}]"
            );
        }
    }

    #[test]
    fn backoff_never_exceeds_jittered_cap() {
        for _ in 0..200 {
            let ms = backoff_ms(10, 500, 8000);
            assert!(ms <= (8000.0 * 1.2) as u64);
        }
    }
}
