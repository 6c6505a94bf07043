//! Spectrum bars: frame intake, silence suppression and bar layout.

use crate::analyzer::SampleFrame;
use crate::color::Rgba;
use crate::config::{DrawConfig, OffsetConfig};

use super::canvas::Canvas;
use super::geometry::{BarGeometry, Rect};

/// Leading-band level at or below which a frame counts as silent.
const SILENCE_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Repaint,
    /// Silence just set in: repaint once with all bars at rest.
    Settle,
    Suppressed,
}

#[derive(Debug, Clone, Copy)]
struct SilenceCounter {
    count: u32,
    threshold: u32,
}

impl SilenceCounter {
    fn observe(&mut self, leading: f32) -> UpdateOutcome {
        if leading > SILENCE_EPSILON {
            self.count = 0;
            return UpdateOutcome::Repaint;
        }
        self.count = self.count.saturating_add(1);
        if self.count <= self.threshold {
            UpdateOutcome::Repaint
        } else if self.count == self.threshold.saturating_add(1) {
            UpdateOutcome::Settle
        } else {
            UpdateOutcome::Suppressed
        }
    }
}

pub struct Spectrum {
    draw: DrawConfig,
    offset: OffsetConfig,
    bars: usize,
    size: (u32, u32),
    geometry: BarGeometry,
    frame: SampleFrame,
    silence: SilenceCounter,
}

impl Spectrum {
    pub fn new(draw: DrawConfig, offset: OffsetConfig, bars: usize) -> Self {
        let silence = SilenceCounter {
            count: 0,
            threshold: draw.silence,
        };
        let geometry = BarGeometry::compute(0, 0, bars, draw.padding, &offset);
        Self {
            draw,
            offset,
            bars,
            size: (0, 0),
            geometry,
            frame: SampleFrame::zeros(bars),
            silence,
        }
    }

    pub fn geometry(&self) -> &BarGeometry {
        &self.geometry
    }

    pub fn frame(&self) -> &SampleFrame {
        &self.frame
    }

    pub fn scale(&self) -> f32 {
        self.draw.scale
    }

    /// Store a new frame and decide whether it is worth a repaint.
    ///
    /// Once silence settles, the all-zero frame stays current until a loud
    /// frame arrives, so any later repaint still shows resting bars.
    pub fn update(&mut self, frame: SampleFrame) -> UpdateOutcome {
        let outcome = self.silence.observe(frame.leading().unwrap_or(0.0));
        match outcome {
            UpdateOutcome::Repaint => self.frame = frame,
            UpdateOutcome::Settle => self.frame = SampleFrame::zeros(frame.len()),
            UpdateOutcome::Suppressed => {}
        }
        outcome
    }

    /// Recompute bar geometry for a surface of `width` x `height` pixels.
    pub fn size_update(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.geometry =
            BarGeometry::compute(width, height, self.bars, self.draw.padding, &self.offset);
    }

    pub fn set_bars(&mut self, bars: usize) {
        self.bars = bars;
        self.frame = SampleFrame::zeros(bars);
        self.size_update(self.size.0, self.size.1);
    }

    pub fn set_draw(&mut self, draw: DrawConfig) {
        self.silence.threshold = draw.silence;
        self.draw = draw;
        self.size_update(self.size.0, self.size.1);
    }

    pub fn set_scale(&mut self, scale: f32) {
        if scale > 0.0 {
            self.draw.scale = scale;
        }
    }

    /// Bar rectangles for the current frame, left to right.
    pub fn bars(&self) -> Vec<Rect> {
        let geo = &self.geometry;
        let full = geo.bar_height as f32;
        let floor = self.draw.zero.min(geo.bar_height);

        let mut x = geo.left;
        let mut rects = Vec::with_capacity(self.frame.len());
        for (i, &value) in self.frame.values().iter().enumerate() {
            let width = geo.bar_width(i);
            let height = ((full * (self.draw.scale * value).min(1.0)) as u32).max(floor);
            rects.push(Rect::new(x, geo.baseline - height, width, height));
            x = x.saturating_add(width).saturating_add(geo.padding);
        }
        rects
    }

    pub fn paint(&self, canvas: &mut Canvas, color: Rgba) {
        for rect in self.bars() {
            canvas.fill_rect(rect, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::reader::{stream_channel, StreamEvent};

    fn spectrum(bars: usize, silence: u32) -> Spectrum {
        let draw = DrawConfig {
            padding: 1,
            zero: 0,
            silence,
            scale: 1.0,
        };
        let mut spectrum = Spectrum::new(draw, OffsetConfig::default(), bars);
        spectrum.size_update(bars as u32 * 10, 100);
        spectrum
    }

    fn level(value: f32, bars: usize) -> SampleFrame {
        SampleFrame::new(vec![value; bars])
    }

    #[test]
    fn silence_settles_once_then_suppresses() {
        let mut s = spectrum(4, 3);
        assert_eq!(s.update(level(0.5, 4)), UpdateOutcome::Repaint);

        let outcomes: Vec<UpdateOutcome> = (0..8).map(|_| s.update(level(0.0, 4))).collect();
        assert_eq!(&outcomes[..3], &[UpdateOutcome::Repaint; 3]);
        assert_eq!(outcomes[3], UpdateOutcome::Settle);
        assert!(outcomes[4..].iter().all(|&o| o == UpdateOutcome::Suppressed));
        assert_eq!(
            outcomes.iter().filter(|&&o| o == UpdateOutcome::Settle).count(),
            1
        );

        assert_eq!(s.update(level(0.3, 4)), UpdateOutcome::Repaint);
        assert_eq!(s.update(level(0.0, 4)), UpdateOutcome::Repaint);
    }

    #[test]
    fn settle_frame_draws_resting_bars() {
        let mut s = spectrum(4, 0);
        // only the leading band decides silence
        let frame = SampleFrame::new(vec![0.0, 0.2, 0.4, 0.6]);
        assert_eq!(s.update(frame), UpdateOutcome::Settle);
        assert!(s.bars().iter().all(|r| r.height == 0));
    }

    #[test]
    fn suppressed_frames_keep_the_settled_bars() {
        let mut s = spectrum(4, 1);
        s.update(level(0.8, 4));
        let quiet_lead = SampleFrame::new(vec![0.0, 0.7, 0.8, 0.9]);

        // settle and a suppressed frame land in the same UI tick
        assert_eq!(s.update(quiet_lead.clone()), UpdateOutcome::Repaint);
        assert_eq!(s.update(quiet_lead.clone()), UpdateOutcome::Settle);
        assert_eq!(s.update(quiet_lead), UpdateOutcome::Suppressed);
        assert!(s.frame().values().iter().all(|&v| v == 0.0));
        assert!(s.bars().iter().all(|r| r.height == 0));

        assert_eq!(s.update(level(0.5, 4)), UpdateOutcome::Repaint);
        assert!(s.bars().iter().all(|r| r.height == 50));
    }

    #[test]
    fn huge_padding_does_not_overflow() {
        let mut s = spectrum(64, 10);
        s.set_draw(DrawConfig {
            padding: 100_000_000,
            zero: 0,
            silence: 10,
            scale: 1.0,
        });
        s.size_update(200, 100);
        s.update(level(0.5, 64));
        let rects = s.bars();
        assert_eq!(rects.len(), 64);
        assert_eq!(rects[0].x, 0);
        assert_eq!(rects[63].x, u32::MAX);
    }

    #[test]
    fn bars_grow_up_from_the_baseline() {
        let mut s = spectrum(4, 10);
        s.update(SampleFrame::new(vec![0.0, 0.25, 0.5, 2.0]));
        let rects = s.bars();
        let geo = *s.geometry();

        assert_eq!(rects.len(), 4);
        assert_eq!(rects[1].height, 25);
        assert_eq!(rects[2].height, 50);
        // scale * value is capped at full height
        assert_eq!(rects[3].height, geo.bar_height);
        for r in &rects {
            assert_eq!(r.y + r.height, geo.baseline);
        }
        for pair in rects.windows(2) {
            assert_eq!(pair[1].x, pair[0].x + pair[0].width + geo.padding);
        }
    }

    #[test]
    fn zero_floor_keeps_bars_visible() {
        let mut s = spectrum(2, 10);
        let mut draw = DrawConfig {
            padding: 1,
            zero: 3,
            silence: 10,
            scale: 1.0,
        };
        s.set_draw(draw.clone());
        s.update(SampleFrame::new(vec![0.5, 0.01]));
        let rects = s.bars();
        assert_eq!(rects[0].height, 50);
        assert_eq!(rects[1].height, 3);

        draw.zero = 500;
        s.set_draw(draw);
        assert!(s.bars().iter().all(|r| r.height == s.geometry().bar_height));
    }

    #[test]
    fn frames_are_drawn_in_stream_order() {
        let (sender, rx) = stream_channel(8);
        for value in [0.1, 0.5, 0.9] {
            sender.send_frame(level(value, 20));
        }
        sender.send_stopped();

        let mut s = spectrum(20, 10);
        let mut drawn = Vec::new();
        for event in rx.try_iter() {
            match event {
                StreamEvent::Frame(frame) => {
                    assert_eq!(s.update(frame), UpdateOutcome::Repaint);
                    drawn.push(s.bars()[0].height);
                }
                StreamEvent::Stopped => break,
            }
        }
        assert_eq!(drawn, vec![10, 50, 90]);
    }

    #[test]
    fn resize_recomputes_geometry() {
        let mut s = spectrum(8, 10);
        s.size_update(403, 60);
        let rects = {
            s.update(level(1.0, 8));
            s.bars()
        };
        let last = rects.last().unwrap();
        assert_eq!(last.x + last.width, 403);
        assert_eq!(rects[0].height, 60);

        s.set_bars(4);
        assert_eq!(s.geometry().bars, 4);
        assert_eq!(s.frame().len(), 4);
    }
}
