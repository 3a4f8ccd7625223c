//! Rank → single comparable integer.
//!
//! Division ladder (IRON IV … DIAMOND I) maps to fixed bands of width 400
//! with 100 per division step. The apex tiers (MASTER and above) share one
//! ladder ordered purely by LP, floored above every division band.

const DIVISION_TIERS: [&str; 6] = ["IRON", "BRONZE", "SILVER", "GOLD", "PLATINUM", "DIAMOND"];
const APEX_TIERS: [&str; 3] = ["MASTER", "GRANDMASTER", "CHALLENGER"];

const TIER_BAND: i64 = 400;
const DIVISION_STEP: i64 = 100;

const APEX_FLOOR: i64 = (DIVISION_TIERS.len() as i64 + 1) * TIER_BAND;

/// Comparable rank value, strictly increasing with skill. Unranked is the
/// floor. Panics on a tier name outside the documented set; that is a
/// logic error upstream, not data to be guessed around.
pub fn rank_value(tier: &str, division: u8, lp: i64) -> i64 {
    let tier_upper = tier.to_ascii_uppercase();
    if tier_upper.is_empty() || tier_upper == "UNRANKED" {
        return 0;
    }
    if APEX_TIERS.contains(&tier_upper.as_str()) {
        return APEX_FLOOR + lp;
    }
    match DIVISION_TIERS.iter().position(|t| *t == tier_upper) {
        Some(index) => {
            let division = i64::from(division.clamp(1, 4));
            (index as i64 + 1) * TIER_BAND + (4 - division) * DIVISION_STEP
        }
        None => panic!("unknown rank tier '{tier}'"),
    }
}
