// Nerd Font glyph helpers shared by gauges, panels and overlays.

/// Shown in place of a gauge that was retired for running too slowly.
pub const SLOW_GAUGE_GLYPH: &str = "🐢";
pub const ERROR_GLYPH: &str = "";

const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Block character for a level in `0.0..=1.0`.
pub fn block_for_level(level: f32) -> char {
    let clamped = if level.is_finite() {
        level.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let index = (clamped * BLOCKS.len() as f32).ceil() as usize;
    BLOCKS[index.saturating_sub(1).min(BLOCKS.len() - 1)]
}

/// One block character per level.
pub fn sparkline(levels: impl IntoIterator<Item = f32>) -> String {
    levels.into_iter().map(block_for_level).collect()
}

/// Pick the glyph for `value` in `0.0..=1.0` from an ordered ramp (empty to full).
///
/// Half-up rounding keeps every step reachable.
pub fn glyph_for_quantity<'a>(ramp: &[&'a str], value: f32) -> &'a str {
    let Some(max_index) = ramp.len().checked_sub(1) else {
        return "";
    };
    let clamped = value.clamp(0.0, 1.0);
    let index = ((clamped * max_index as f32) + 0.5).floor() as usize;
    ramp[index.min(max_index)]
}

/// Truncate to `max_chars` characters, appending an ellipsis when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
