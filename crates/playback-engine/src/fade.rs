//! Per-pipeline fade state machine.
//!
//! A [`Fade`] carries its own ramp, so the curve that applies is a function of the variant
//! alone. Progress runs from `1.0` (full remaining distance) down to `0.0`; elapsed time is
//! kept in integer milliseconds so a fade of `d` ms at a tick of `t` ms always completes on
//! tick `ceil(d / t)`.

use engine_types::FadePhase;

/// Remaining distance of a single fade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ramp {
    elapsed_ms: u64,
    duration_ms: u64,
}

impl Ramp {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            elapsed_ms: 0,
            duration_ms,
        }
    }

    /// Remaining progress; `<= 0.0` once the ramp has run out.
    ///
    /// A ramp whose duration is an exact multiple of the tick ends at exactly `0.0`; otherwise
    /// the last tick overshoots below zero. A zero-length ramp drops by `1.0` on its first tick.
    pub fn progress(&self) -> f64 {
        if self.duration_ms == 0 {
            return if self.elapsed_ms == 0 { 1.0 } else { 0.0 };
        }
        1.0 - self.elapsed_ms as f64 / self.duration_ms as f64
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed_ms > 0 && self.elapsed_ms >= self.duration_ms
    }

    fn advance(&mut self, tick_ms: u64) {
        self.elapsed_ms = self.elapsed_ms.saturating_add(tick_ms);
    }

    fn clamped(&self) -> f64 {
        self.progress().clamp(0.0, 1.0)
    }
}

/// Volume transition a pipeline is in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Fade {
    #[default]
    NoFade,
    FadeIn(Ramp),
    FadeOut(Ramp),
    XfadeIn(Ramp),
    XfadeOut(Ramp),
}

/// Outcome of advancing a fade by one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeStep {
    /// Nothing changed (no fade active).
    Idle,
    /// Still ramping.
    Ramping,
    /// A fade-in finished; the pipeline now plays at full volume.
    Arrived,
    /// A fade-out finished; the pipeline must be destroyed.
    Departed,
}

impl Fade {
    pub fn fade_in(duration_ms: u64) -> Self {
        Fade::FadeIn(Ramp::new(duration_ms))
    }

    pub fn fade_out(duration_ms: u64) -> Self {
        Fade::FadeOut(Ramp::new(duration_ms))
    }

    pub fn xfade_in(duration_ms: u64) -> Self {
        Fade::XfadeIn(Ramp::new(duration_ms))
    }

    pub fn xfade_out(duration_ms: u64) -> Self {
        Fade::XfadeOut(Ramp::new(duration_ms))
    }

    pub fn phase(&self) -> FadePhase {
        match self {
            Fade::NoFade => FadePhase::NoFade,
            Fade::FadeIn(_) => FadePhase::FadeIn,
            Fade::FadeOut(_) => FadePhase::FadeOut,
            Fade::XfadeIn(_) => FadePhase::XfadeIn,
            Fade::XfadeOut(_) => FadePhase::XfadeOut,
        }
    }

    pub fn ramp(&self) -> Option<&Ramp> {
        match self {
            Fade::NoFade => None,
            Fade::FadeIn(r) | Fade::FadeOut(r) | Fade::XfadeIn(r) | Fade::XfadeOut(r) => Some(r),
        }
    }

    /// Remaining progress of the active ramp (`0.0` when not fading).
    pub fn progress(&self) -> f64 {
        self.ramp().map(Ramp::progress).unwrap_or(0.0)
    }

    /// `true` for the two variants that end in destruction.
    pub fn is_departing(&self) -> bool {
        matches!(self, Fade::FadeOut(_) | Fade::XfadeOut(_))
    }

    /// Gain for the pipeline's volume stage at the current progress.
    ///
    /// Incoming crossfades ramp linearly; every other curve is logarithmic.
    pub fn volume(&self) -> f64 {
        match self {
            Fade::NoFade => 1.0,
            Fade::FadeIn(r) => 1.0 - (r.clamped() * 9.0 + 1.0).log10(),
            Fade::XfadeIn(r) => 1.0 - r.clamped(),
            Fade::FadeOut(r) | Fade::XfadeOut(r) => 1.0 - ((1.0 - r.clamped()) * 9.0 + 1.0).log10(),
        }
    }

    /// Advance by one tick.
    ///
    /// A finished fade-in collapses to [`Fade::NoFade`]; a finished fade-out stays in place so
    /// the caller can schedule destruction.
    pub fn advance(&mut self, tick_ms: u64) -> FadeStep {
        let ramp = match self {
            Fade::NoFade => return FadeStep::Idle,
            Fade::FadeIn(r) | Fade::FadeOut(r) | Fade::XfadeIn(r) | Fade::XfadeOut(r) => r,
        };
        ramp.advance(tick_ms);
        if !ramp.is_finished() {
            return FadeStep::Ramping;
        }
        if self.is_departing() {
            FadeStep::Departed
        } else {
            *self = Fade::NoFade;
            FadeStep::Arrived
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks_until_done(mut fade: Fade, tick_ms: u64) -> (u64, Fade) {
        let mut ticks = 0;
        loop {
            ticks += 1;
            match fade.advance(tick_ms) {
                FadeStep::Ramping => continue,
                FadeStep::Idle => panic!("fade went idle"),
                FadeStep::Arrived | FadeStep::Departed => return (ticks, fade),
            }
        }
    }

    #[test]
    fn fade_takes_ceil_duration_over_tick() {
        for (duration, tick) in [(1000u64, 40u64), (1010, 40), (5000, 40), (333, 100), (1, 40)] {
            let expected = duration.div_ceil(tick);
            let (ticks, fade) = ticks_until_done(Fade::fade_out(duration), tick);
            assert_eq!(ticks, expected, "duration {duration} tick {tick}");
            if duration % tick == 0 {
                assert_eq!(fade.progress(), 0.0);
            } else {
                assert!(fade.progress() < 0.0);
            }
            let (ticks, fade) = ticks_until_done(Fade::fade_in(duration), tick);
            assert_eq!(ticks, expected);
            assert_eq!(fade, Fade::NoFade);
        }
    }

    #[test]
    fn progress_is_negative_when_tick_overshoots() {
        let mut fade = Fade::fade_out(1010);
        for _ in 0..25 {
            fade.advance(40);
        }
        assert!(fade.progress() > 0.0);
        assert_eq!(fade.advance(40), FadeStep::Departed);
        assert!(fade.progress() < 0.0);
    }

    #[test]
    fn zero_length_fade_is_instant() {
        let mut fade = Fade::fade_in(0);
        assert_eq!(fade.progress(), 1.0);
        assert_eq!(fade.volume(), 0.0);
        assert_eq!(fade.advance(40), FadeStep::Arrived);
        assert_eq!(fade.volume(), 1.0);
    }

    #[test]
    fn fade_in_curve_is_logarithmic() {
        let fade = Fade::fade_in(1000);
        assert!(fade.volume().abs() < 1e-12);
        let mut half = Fade::fade_in(1000);
        half.advance(500);
        let expected = 1.0 - (0.5f64 * 9.0 + 1.0).log10();
        assert!((half.volume() - expected).abs() < 1e-12);
        // Rises slower than linear early on.
        assert!(half.volume() < 0.5);
    }

    #[test]
    fn fade_out_starts_audible_and_ends_silent() {
        let mut fade = Fade::fade_out(400);
        assert!((fade.volume() - 1.0).abs() < 1e-12);
        fade.advance(200);
        let expected = 1.0 - (0.5f64 * 9.0 + 1.0).log10();
        assert!((fade.volume() - expected).abs() < 1e-12);
        fade.advance(200);
        assert!(fade.volume().abs() < 1e-12);
    }

    #[test]
    fn xfade_in_is_linear_and_xfade_out_logarithmic() {
        let mut inc = Fade::xfade_in(1000);
        let mut out = Fade::xfade_out(1000);
        assert_eq!(inc.volume(), 0.0);
        assert!((out.volume() - 1.0).abs() < 1e-12);
        inc.advance(250);
        out.advance(250);
        assert!((inc.volume() - 0.25).abs() < 1e-12);
        let expected = 1.0 - (0.25f64 * 9.0 + 1.0).log10();
        assert!((out.volume() - expected).abs() < 1e-12);
    }

    #[test]
    fn departing_fade_stays_put_after_finishing() {
        let mut fade = Fade::xfade_out(80);
        assert_eq!(fade.advance(40), FadeStep::Ramping);
        assert_eq!(fade.advance(40), FadeStep::Departed);
        assert_eq!(fade.phase(), FadePhase::XfadeOut);
        assert!(fade.is_departing());
    }

    #[test]
    fn no_fade_is_idle_at_full_volume() {
        let mut fade = Fade::NoFade;
        assert_eq!(fade.advance(40), FadeStep::Idle);
        assert_eq!(fade.volume(), 1.0);
        assert_eq!(fade.phase(), FadePhase::NoFade);
    }
}
