/// 单维闭区间 `(lo, hi)`
pub type Bounds = (u64, u64);

/// 交换反向的 bound，保证每维 `lo <= hi`
pub fn normalize(ranges: &[Bounds]) -> Vec<Bounds> {
    ranges
        .iter()
        .map(|&(lo, hi)| if lo > hi { (hi, lo) } else { (lo, hi) })
        .collect()
}

/// `v >> exp`，`exp == 64` 时结果为 0
pub(crate) fn shr(v: u64, exp: u32) -> u64 {
    v.checked_shr(exp).unwrap_or(0)
}

/// 覆盖 `ranges` 所需的 `2^exp` 边长网格数。超大跨度时饱和而不溢出，bound 顺序无关。
pub(crate) fn cell_count(ranges: &[Bounds], exp: u32) -> u128 {
    ranges
        .iter()
        .map(|&(lo, hi)| shr(hi, exp).abs_diff(shr(lo, exp)) as u128 + 1)
        .fold(1u128, |acc, n| acc.saturating_mul(n))
}

/// 为查询选择网格指数
///
/// 初值跟随最窄的跨度（反复折半直到不超过 2）。各维跨度悬殊时初值可能很小、覆盖格数巨大，
/// 于是继续增大指数，直到覆盖所需格数小于 `threshold`。格子越大，过滤器要丢弃的多余 key
/// 越多，但 scan 次数越少。
pub(crate) fn select_exponent(ranges: &[Bounds], precision: u32, threshold: u64) -> u32 {
    let mut delta = ranges
        .iter()
        .map(|&(lo, hi)| hi.abs_diff(lo) as u128 + 1)
        .min()
        .unwrap_or(1);

    let mut exp = 1u32;
    while delta > 2 {
        delta /= 2;
        exp += 1;
    }

    // exp == precision 时每一维都只剩一个格子
    let mut exp = exp.min(precision);
    while exp < precision && cell_count(ranges, exp) >= threshold as u128 {
        exp += 1;
    }
    exp
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn normalize_swaps_reversed_pairs() {
        assert_eq!(normalize(&[(50, 40), (1, 2)]), vec![(40, 50), (1, 2)]);
    }

    #[test]
    fn reversed_bounds_count_like_normalized() {
        let reversed = [(9, 0), (40_000, 17)];
        let normalized = normalize(&reversed);
        for exp in [0, 1, 5, 64] {
            assert_eq!(cell_count(&reversed, exp), cell_count(&normalized, exp));
        }
        assert_eq!(
            select_exponent(&reversed, 64, 20),
            select_exponent(&normalized, 64, 20)
        );
    }

    #[test]
    fn seed_tracks_narrowest_span() {
        // 跨度 11 -> 5 -> 2：指数 3，覆盖 2 x 2 格
        assert_eq!(select_exponent(&[(40, 50), (40, 50)], 64, 20), 3);
        // 单点
        assert_eq!(select_exponent(&[(7, 7), (9, 9)], 64, 20), 1);
    }

    #[test]
    fn skewed_spans_are_coarsened() {
        let ranges = [(40, 50), (100_000, 115_000)];
        let exp = select_exponent(&ranges, 64, 20);
        assert!(cell_count(&ranges, exp) < 20);
        assert!(cell_count(&ranges, exp - 1) >= 20);
    }

    #[test]
    fn full_width_ranges_do_not_overflow() {
        let ranges = [(0, u64::MAX), (0, u64::MAX)];
        let exp = select_exponent(&ranges, 64, 20);
        assert_eq!(exp, 64);
        assert_eq!(cell_count(&ranges, exp), 1);
        assert_eq!(cell_count(&ranges, 1), 1u128 << 126);
    }

    #[test]
    fn exponent_never_exceeds_precision() {
        let ranges = [(0, 15), (0, 15), (0, 15)];
        assert_eq!(select_exponent(&ranges, 4, 2), 4);
        assert_eq!(cell_count(&ranges, 4), 1);
    }

    #[test]
    fn fanout_stays_below_threshold() {
        let mut rng = StdRng::seed_from_u64(7);
        for dims in 1..=4 {
            for _ in 0..2000 {
                let ranges: Vec<Bounds> = (0..dims)
                    .map(|_| {
                        let a = rng.gen_range(0..1_000_000u64);
                        let b = rng.gen_range(0..1_000_000u64);
                        (a.min(b), a.max(b))
                    })
                    .collect();
                let exp = select_exponent(&ranges, 64, 20);
                assert!(cell_count(&ranges, exp) < 20, "{ranges:?} exp={exp}");
            }
        }
    }
}
