use super::DispatchOutcome;

/// Which asset frame belongs to a generation frame id during uninterrupted
/// playback: each asset is shown for `frames_per_asset` frames and the
/// sequence wraps after `asset_count` assets.
pub fn asset_frame_for(generation_frame_id: u64, frames_per_asset: u32, asset_count: u32) -> u32 {
    let frames_per_asset = frames_per_asset.max(1) as u64;
    let asset_count = asset_count.max(1) as u64;

    ((generation_frame_id / frames_per_asset) % asset_count) as u32
}

/// Keeps the asset frame index and the generation frame id apart.
///
/// The generation frame id is owned by the frame generation context and
/// advances once per presented frame. The asset frame index picks the file
/// set on disk and follows [`asset_frame_for`] until playback is paused or
/// stepped by hand.
#[derive(Debug, Clone)]
pub struct FrameClock {
    asset_count: u32,
    frames_per_asset: u32,
    asset_frame_index: u32,
    frames_on_asset: u32,
    generation_frame_id: u64,
    paused: bool,
    reset_pending: bool,
}

impl FrameClock {
    pub fn new(asset_count: u32, frames_per_asset: u32) -> Self {
        Self {
            asset_count: asset_count.max(1),
            frames_per_asset: frames_per_asset.max(1),
            asset_frame_index: 0,
            frames_on_asset: 0,
            generation_frame_id: 0,
            paused: false,
            // nothing to blend with before the first frame
            reset_pending: true,
        }
    }

    #[inline]
    pub fn asset_frame_index(&self) -> u32 {
        self.asset_frame_index
    }

    #[inline]
    pub fn generation_frame_id(&self) -> u64 {
        self.generation_frame_id
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    /// Moves to the next asset frame right away.
    pub fn step(&mut self) {
        self.asset_frame_index = (self.asset_frame_index + 1) % self.asset_count;
        self.frames_on_asset = 0;
    }

    /// Records that new assets are on the GPU; the next generate dispatch
    /// must drop its history.
    pub fn note_reload(&mut self) {
        self.reset_pending = true;
    }

    /// Whether the frame being recorded follows a reload.
    #[inline]
    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Clears the pending reset once a generate dispatch has carried it.
    /// Skipped frames leave it pending.
    pub fn note_dispatch(&mut self, outcome: DispatchOutcome) {
        if outcome == DispatchOutcome::Recorded {
            self.reset_pending = false;
        }
    }

    /// Called once the context has closed a frame, with the id it returned.
    pub fn advance(&mut self, next_generation_frame_id: u64) {
        if next_generation_frame_id != self.generation_frame_id + 1 {
            log::warn!(
                "Generation frame id jumped from {} to {}",
                self.generation_frame_id,
                next_generation_frame_id
            );
        }

        self.generation_frame_id = next_generation_frame_id;

        if self.paused {
            return;
        }

        self.frames_on_asset += 1;

        if self.frames_on_asset >= self.frames_per_asset {
            self.step();
        }
    }
}

/// Follows the clock's asset frame index and remembers which asset frame
/// is bound.
#[derive(Debug, Clone)]
pub struct AssetCursor {
    requested: u32,
    bound: u32,
}

impl AssetCursor {
    pub fn new(bound: u32) -> Self {
        Self {
            requested: bound,
            bound,
        }
    }

    #[inline]
    pub fn bound(&self) -> u32 {
        self.bound
    }

    /// Loads the asset frame the clock points at, once per index change.
    ///
    /// A successful load becomes the bound frame and raises a reset on the
    /// clock. A failed load is logged and retried only after the clock moves
    /// on; the bound frame stays and no reset is raised.
    pub fn sync<T, E>(
        &mut self,
        clock: &mut FrameClock,
        load: impl FnOnce(u32) -> Result<T, E>,
    ) -> Option<T>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let wanted = clock.asset_frame_index();

        if wanted == self.requested {
            return None;
        }

        self.requested = wanted;

        match load(wanted) {
            Ok(asset) => {
                self.bound = wanted;
                clock.note_reload();
                Some(asset)
            }
            Err(e) => {
                log::warn!("Keeping frame {}: {:#}", self.bound, anyhow::Error::new(e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::context::tests::*;
    use super::super::*;
    use super::*;
    use crate::assets::tests::{write_frame, write_matrix};
    use crate::assets::{FrameAddressing, FrameLayout, FrameResourceLoader};

    #[test]
    fn mapping_holds_each_asset_for_its_frames() {
        let indices: Vec<u32> = (0..8).map(|id| asset_frame_for(id, 2, 3)).collect();

        assert_eq!(indices, vec![0, 0, 1, 1, 2, 2, 0, 0]);
        assert_eq!(asset_frame_for(5, 0, 0), 0);
    }

    #[test]
    fn clock_follows_mapping_while_playing() {
        let mut clock = FrameClock::new(4, 3);

        for id in 0..40u64 {
            assert_eq!(clock.asset_frame_index(), asset_frame_for(id, 3, 4));
            clock.advance(id + 1);
        }
    }

    #[test]
    fn pause_holds_asset_but_not_frame_id() {
        let mut clock = FrameClock::new(4, 1);
        clock.advance(1);
        assert_eq!(clock.asset_frame_index(), 1);

        assert!(clock.toggle_pause());
        clock.advance(2);
        clock.advance(3);

        assert_eq!(clock.asset_frame_index(), 1);
        assert_eq!(clock.generation_frame_id(), 3);

        clock.step();
        assert_eq!(clock.asset_frame_index(), 2);
    }

    #[test]
    fn reset_is_reported_once_per_reload() {
        let mut clock = FrameClock::new(2, 1);

        assert!(clock.reset_pending());
        clock.note_dispatch(DispatchOutcome::Recorded);
        assert!(!clock.reset_pending());

        clock.note_reload();
        assert!(clock.reset_pending());
        clock.note_dispatch(DispatchOutcome::Recorded);
        assert!(!clock.reset_pending());
    }

    #[test]
    fn skipped_frames_keep_the_reset_pending() {
        let backend = RecordingBackend::default();
        let calls = backend.calls.clone();
        let mut context = FrameGenerationContext::new(backend);
        context.create(&create_desc()).unwrap();

        let mut settings = settings(DispatchMode::Manual);
        let mut clock = FrameClock::new(4, 1);
        let run_frame = |context: &mut FrameGenerationContext<RecordingBackend>,
                         clock: &mut FrameClock,
                         settings: &GenerationSettings| {
            let reset = clock.reset_pending();
            let outcome = context
                .dispatch_frame(settings, prepare_desc(0), generate_desc(0, reset))
                .unwrap();
            clock.note_dispatch(outcome);
            clock.advance(context.end_frame());
        };

        run_frame(&mut context, &mut clock, &settings);

        // generation off, then a reload while nothing is dispatched
        settings.enabled = false;
        run_frame(&mut context, &mut clock, &settings);
        clock.note_reload();
        run_frame(&mut context, &mut clock, &settings);
        assert!(clock.reset_pending());

        settings.enabled = true;
        run_frame(&mut context, &mut clock, &settings);
        run_frame(&mut context, &mut clock, &settings);

        // history is stale after any gap, reload or not
        settings.enabled = false;
        run_frame(&mut context, &mut clock, &settings);
        settings.enabled = true;
        clock.note_reload();
        run_frame(&mut context, &mut clock, &settings);

        let generated: Vec<(u64, bool)> = calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Generate { frame_id, reset } => Some((*frame_id, *reset)),
                _ => None,
            })
            .collect();

        assert_eq!(generated, vec![(0, true), (3, true), (4, false), (6, true)]);
    }

    #[test]
    fn unreadable_frames_keep_the_bound_one() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FrameLayout::new(dir.path(), FrameAddressing::Raw);
        for index in 0..5 {
            write_frame(&layout, index);
        }
        // frame 2's record is also frame 3's previous one
        write_matrix(&layout.paths(2).matrix, 12, 3.0);
        let loader = FrameResourceLoader::new(layout);

        let mut clock = FrameClock::new(5, 1);
        let mut cursor = AssetCursor::new(0);
        let mut loads = Vec::new();
        let mut sync = |cursor: &mut AssetCursor, clock: &mut FrameClock| {
            cursor.sync(clock, |index| {
                loads.push(index);
                loader.load(index)
            })
        };

        assert!(sync(&mut cursor, &mut clock).is_none());
        clock.note_dispatch(DispatchOutcome::Recorded);

        clock.advance(1);
        assert_eq!(sync(&mut cursor, &mut clock).map(|asset| asset.index), Some(1));
        assert!(clock.reset_pending());
        clock.note_dispatch(DispatchOutcome::Recorded);

        for frame_id in 2..4 {
            clock.advance(frame_id);
            assert!(sync(&mut cursor, &mut clock).is_none());
            assert!(sync(&mut cursor, &mut clock).is_none());
            assert_eq!(cursor.bound(), 1);
            assert!(!clock.reset_pending());
        }

        clock.advance(4);
        assert_eq!(sync(&mut cursor, &mut clock).map(|asset| asset.index), Some(4));
        assert_eq!(cursor.bound(), 4);
        assert!(clock.reset_pending());

        // one attempt per index change
        assert_eq!(loads, vec![1, 2, 3, 4]);
    }

    #[test]
    fn frame_ids_stay_continuous_across_reloads() {
        let backend = RecordingBackend::default();
        let calls = backend.calls.clone();
        let mut context = FrameGenerationContext::new(backend);
        context.create(&create_desc()).unwrap();

        let settings = settings(DispatchMode::Manual);
        let mut clock = FrameClock::new(3, 2);
        let mut loaded = None;
        let mut reload_frames = Vec::new();

        for _ in 0..12 {
            let wanted = clock.asset_frame_index();
            if loaded != Some(wanted) {
                loaded = Some(wanted);
                clock.note_reload();
                reload_frames.push(context.frame_id());
            }

            let reset = clock.reset_pending();
            let outcome = context
                .dispatch_frame(&settings, prepare_desc(0), generate_desc(0, reset))
                .unwrap();
            clock.note_dispatch(outcome);

            let next = context.end_frame();
            clock.advance(next);
        }

        let generated: Vec<(u64, bool)> = calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Generate { frame_id, reset } => Some((*frame_id, *reset)),
                _ => None,
            })
            .collect();

        assert_eq!(generated.len(), 12);
        for (expected, (frame_id, reset)) in generated.iter().enumerate() {
            assert_eq!(*frame_id, expected as u64);
            assert_eq!(*reset, reload_frames.contains(frame_id));
        }
        assert_eq!(reload_frames, vec![0, 2, 4, 6, 8, 10]);
    }
}
