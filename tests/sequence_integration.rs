//! Sequencing integration tests: transition order, boundary-only target
//! changes, load failures and stale loads.

#![allow(dead_code, unused_imports)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use aberredavatar::components::atlas::{AtlasDescriptor, AtlasImage};
use aberredavatar::components::playback::{
    MainState, PlaybackState, SubPhase, all_playback_states,
};
use aberredavatar::error::{AvatarError, LoadError};
use aberredavatar::events::playback::{ClipCompleteEvent, PlaybackErrorEvent, StateChangeEvent};
use aberredavatar::resources::atlascatalog::AtlasCatalog;
use aberredavatar::resources::device::{DeviceCapabilities, StaticDeviceProbe};
use aberredavatar::events::loader::{LoadJob, LoadOutcome};
use aberredavatar::resources::loader::LoadExecutor;
use aberredavatar::resources::resourcecache::ResourceCache;
use aberredavatar::systems::atlasloader::{AtlasSource, load_frame_set};
use aberredavatar::systems::sequence::{SequenceController, Visual};

/// Exact in binary floating point: 8 fps clips advance one frame per tick.
const DT: f32 = 0.125;

fn s(main: MainState, sub: SubPhase) -> PlaybackState {
    PlaybackState::clip(main, sub)
}

fn two_frame_clip(key: &str) -> AtlasDescriptor {
    AtlasDescriptor {
        sheet_width: 20,
        sheet_height: 10,
        frame_width: 10,
        frame_height: 10,
        frame_count: 2,
        frame_rate: 8.0,
        image_locator: format!("{}.png", key),
    }
}

fn catalog() -> AtlasCatalog {
    let mut catalog = AtlasCatalog::new();
    for state in all_playback_states() {
        let key = state.cache_key();
        let variant = two_frame_clip(key.as_str());
        catalog.insert(key, [variant]);
    }
    catalog
}

/// Fails for locators in `broken` until healed; records every fetch.
#[derive(Default)]
struct FlakySource {
    broken: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
}

impl FlakySource {
    fn new(broken: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            broken: Mutex::new(broken.iter().map(|b| b.to_string()).collect()),
            fetched: Mutex::new(Vec::new()),
        })
    }

    fn heal(&self) {
        self.broken.lock().unwrap().clear();
    }
}

impl AtlasSource for FlakySource {
    fn fetch(&self, d: &AtlasDescriptor) -> Result<AtlasImage, LoadError> {
        self.fetched.lock().unwrap().push(d.image_locator.clone());
        if self.broken.lock().unwrap().contains(&d.image_locator) {
            return Err(LoadError::Io(format!("{} not found", d.image_locator)));
        }
        Ok(AtlasImage::dimensions_only(d.sheet_width, d.sheet_height))
    }
}

struct Rig {
    controller: SequenceController,
    cache: ResourceCache,
    changes: Rc<RefCell<Vec<StateChangeEvent>>>,
    completes: Rc<RefCell<Vec<PlaybackState>>>,
    errors: Rc<RefCell<Vec<PlaybackErrorEvent>>>,
}

/// Runs jobs on drain except for gated keys, which wait until opened.
struct GatedExecutor {
    source: Arc<FlakySource>,
    gated: Rc<RefCell<HashSet<String>>>,
    queue: Vec<LoadJob>,
}

impl LoadExecutor for GatedExecutor {
    fn submit(&mut self, job: LoadJob) {
        self.queue.push(job);
    }

    fn drain(&mut self) -> Vec<LoadOutcome> {
        let gated = self.gated.borrow();
        let (held, ready): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|job| gated.contains(job.key.as_str()));
        self.queue = held;
        ready
            .into_iter()
            .map(|job| {
                let result = load_frame_set(self.source.as_ref(), &job.descriptor);
                LoadOutcome { job, result }
            })
            .collect()
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Rig {
    fn new(source: Arc<FlakySource>) -> Self {
        Self::with_cache(ResourceCache::inline(
            catalog(),
            DeviceCapabilities::new(StaticDeviceProbe::desktop()),
            source,
        ))
    }

    /// Rig whose loads for the keys in the returned set are held back.
    fn gated(keys: &[&str]) -> (Self, Rc<RefCell<HashSet<String>>>) {
        let gated = Rc::new(RefCell::new(keys.iter().map(|k| k.to_string()).collect()));
        let executor = GatedExecutor {
            source: FlakySource::new(&[]),
            gated: Rc::clone(&gated),
            queue: Vec::new(),
        };
        let cache = ResourceCache::new(
            catalog(),
            DeviceCapabilities::new(StaticDeviceProbe::desktop()),
            Box::new(executor),
        );
        (Self::with_cache(cache), gated)
    }

    fn with_cache(cache: ResourceCache) -> Self {
        let mut controller = SequenceController::new();
        let changes = Rc::new(RefCell::new(Vec::new()));
        let completes = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&changes);
        controller.on_state_change(move |ev| sink.borrow_mut().push(*ev));
        let sink = Rc::clone(&completes);
        controller.on_clip_complete(move |ev: &ClipCompleteEvent| sink.borrow_mut().push(ev.state));
        let sink = Rc::clone(&errors);
        controller.on_error(move |ev| sink.borrow_mut().push(ev.clone()));

        Self {
            controller,
            cache,
            changes,
            completes,
            errors,
        }
    }

    fn start(&mut self) {
        self.controller.start(&mut self.cache).unwrap();
    }

    fn step(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.cache.pump();
            self.controller.update(DT, &mut self.cache).unwrap();
        }
    }

    fn visited(&self) -> Vec<PlaybackState> {
        self.changes.borrow().iter().map(|ev| ev.current).collect()
    }

    fn clear_log(&self) {
        self.changes.borrow_mut().clear();
    }

    /// Locator of the clip the driver is playing.
    fn shown(&self) -> Option<String> {
        self.controller
            .driver()
            .frames()
            .map(|f| f.descriptor.image_locator.clone())
    }

    /// Step one tick at a time, logging every clip that reaches the screen.
    fn step_recording(&mut self, ticks: usize, shown: &mut Vec<String>) {
        for _ in 0..ticks {
            self.step(1);
            if let Some(locator) = self.shown() {
                if shown.last() != Some(&locator) {
                    shown.push(locator);
                }
            }
        }
    }
}

/// Idle rig already in (Writing, Repeat).
fn rig_in_writing_repeat() -> Rig {
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.start();
    rig.controller.set_target_state(MainState::Writing);
    rig.step(20);
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Writing, SubPhase::Repeat)
    );
    rig.clear_log();
    rig
}

#[test]
fn idle_to_target_holds_at_repeat() {
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.start();
    rig.step(1);
    assert!(rig.controller.is_clip_ready());
    assert_eq!(rig.controller.current_state(), PlaybackState::idle());

    rig.controller.set_target_state(MainState::Writing);
    rig.step(40);

    assert_eq!(
        rig.visited(),
        vec![
            s(MainState::Writing, SubPhase::Start),
            s(MainState::Writing, SubPhase::Repeat),
        ]
    );
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Writing, SubPhase::Repeat)
    );
}

#[test]
fn switching_targets_exits_through_end() {
    let mut rig = rig_in_writing_repeat();
    rig.controller.set_target_state(MainState::Talking);
    rig.step(30);
    assert_eq!(
        rig.visited(),
        vec![
            s(MainState::Writing, SubPhase::End),
            s(MainState::Talking, SubPhase::Start),
            s(MainState::Talking, SubPhase::Repeat),
        ]
    );
}

#[test]
fn returning_to_idle_plays_end_first() {
    let mut rig = rig_in_writing_repeat();
    rig.controller.set_target_state(MainState::Idle);
    rig.step(30);
    assert_eq!(
        rig.visited(),
        vec![s(MainState::Writing, SubPhase::End), PlaybackState::idle()]
    );
    assert_eq!(rig.controller.current_state(), PlaybackState::idle());
}

#[test]
fn target_change_waits_for_the_clip_boundary() {
    let mut rig = rig_in_writing_repeat();
    // Mid-clip: frame 1 of the repeat loop.
    rig.step(1);
    rig.controller.set_target_state(MainState::Talking);
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Writing, SubPhase::Repeat)
    );
    assert!(rig.visited().is_empty());
}

#[test]
fn start_enters_a_preset_target_directly() {
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.controller.set_target_state(MainState::Talking);
    rig.start();
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Talking, SubPhase::Start)
    );
    assert_eq!(rig.visited(), vec![s(MainState::Talking, SubPhase::Start)]);
}

#[test]
fn looping_clips_report_every_cycle() {
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.start();
    // One tick loads, then two ticks per two-frame cycle.
    rig.step(1 + 2 * 3);
    assert_eq!(rig.completes.borrow().len(), 3);
    assert!(
        rig.completes
            .borrow()
            .iter()
            .all(|state| *state == PlaybackState::idle())
    );
}

#[test]
fn previous_frame_stays_visible_while_next_clip_loads() {
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.start();
    rig.controller.set_target_state(MainState::Talking);
    rig.step(2);

    // Idle just completed; talking_start is requested but not pumped yet.
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Talking, SubPhase::Start)
    );
    assert!(rig.controller.is_loading());
    match rig.controller.visual() {
        Visual::Frame { frames, .. } => {
            assert_eq!(frames.descriptor.image_locator, "idle.png")
        }
        other => panic!("expected the idle frame, got {:?}", other),
    }

    rig.step(1);
    match rig.controller.visual() {
        Visual::Frame { frames, .. } => {
            assert_eq!(frames.descriptor.image_locator, "talking_start.png")
        }
        other => panic!("expected the talking frame, got {:?}", other),
    }
}

#[test]
fn failed_clip_shows_fallback_and_reports_once() {
    let mut rig = Rig::new(FlakySource::new(&["talking_start.png"]));
    rig.start();
    rig.controller.set_target_state(MainState::Talking);
    rig.step(10);

    assert!(rig.controller.is_failed());
    assert!(matches!(rig.controller.visual(), Visual::Fallback));
    assert_eq!(rig.errors.borrow().len(), 1);
    let event = rig.errors.borrow()[0].clone();
    assert_eq!(event.state, s(MainState::Talking, SubPhase::Start));
    assert!(matches!(
        event.error,
        AvatarError::ResourceLoadExhausted { attempts: 1, .. }
    ));
    // Held: no retries, no further transitions.
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Talking, SubPhase::Start)
    );
}

#[test]
fn target_change_moves_on_from_a_failed_clip() {
    let mut rig = Rig::new(FlakySource::new(&["talking_start.png"]));
    rig.start();
    rig.controller.set_target_state(MainState::Talking);
    rig.step(10);
    assert!(rig.controller.is_failed());
    rig.clear_log();

    rig.controller.set_target_state(MainState::Idle);
    rig.step(10);
    assert_eq!(
        rig.visited(),
        vec![s(MainState::Talking, SubPhase::End), PlaybackState::idle()]
    );
    assert!(!rig.controller.is_failed());
}

#[test]
fn restart_retries_a_failed_clip() {
    let source = FlakySource::new(&["idle.png"]);
    let mut rig = Rig::new(Arc::clone(&source));
    rig.start();
    rig.step(2);
    assert!(rig.controller.is_failed());

    source.heal();
    rig.controller.restart(&mut rig.cache).unwrap();
    rig.step(1);
    assert!(rig.controller.is_clip_ready());
    assert!(matches!(rig.controller.visual(), Visual::Frame { .. }));
}

#[test]
fn stopped_controller_ignores_late_loads() {
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.start();
    assert!(rig.controller.is_loading());
    rig.controller.stop();
    rig.step(3);

    assert!(!rig.controller.is_clip_ready());
    assert!(matches!(rig.controller.visual(), Visual::Empty));

    // The frames landed in the cache, so a restart plays them at once.
    rig.start();
    assert!(rig.controller.is_clip_ready());
}

#[test]
fn random_target_changes_always_exit_through_end() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.start();

    for _ in 0..400 {
        if rng.u8(..4) == 0 {
            let target = MainState::ALL[rng.usize(..MainState::ALL.len())];
            rig.controller.set_target_state(target);
        }
        rig.step(1);
        let driver = rig.controller.driver();
        if driver.frames().is_some() {
            assert!(driver.current_frame() < driver.frame_count());
        }
    }

    let changes = rig.changes.borrow();
    assert!(changes.len() > 10, "only {} transitions", changes.len());
    for ev in changes.iter() {
        if ev.previous.main() != ev.current.main() && ev.previous.sub().is_some() {
            assert_eq!(
                ev.previous.sub(),
                Some(SubPhase::End),
                "{} -> {}",
                ev.previous,
                ev.current
            );
        }
        if ev.current.sub() == Some(SubPhase::Start) && ev.previous.main() != ev.current.main() {
            assert!(matches!(ev.previous.sub(), None | Some(SubPhase::End)));
        }
    }
}

#[test]
fn panicking_observer_does_not_stall_playback() {
    let mut rig = Rig::new(FlakySource::new(&[]));
    rig.controller.on_state_change(|_| panic!("observer bug"));
    rig.start();
    rig.controller.set_target_state(MainState::Writing);
    rig.step(10);
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Writing, SubPhase::Repeat)
    );
    assert_eq!(rig.visited().len(), 2);
}

#[test]
fn slow_end_clip_still_plays_before_the_next_target() {
    let (mut rig, gate) = Rig::gated(&["writing_end"]);
    let mut shown = Vec::new();
    rig.start();
    rig.step_recording(1, &mut shown);
    rig.controller.set_target_state(MainState::Writing);
    rig.step_recording(1, &mut shown);
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Writing, SubPhase::Start)
    );

    // Start finishes while the target points elsewhere; End is still loading.
    rig.controller.set_target_state(MainState::Talking);
    rig.step_recording(4, &mut shown);
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Writing, SubPhase::End)
    );
    assert!(rig.controller.is_loading());

    // A second change while End is loading must not skip it.
    rig.controller.set_target_state(MainState::Idle);
    rig.step_recording(1, &mut shown);
    assert_eq!(
        rig.controller.current_state(),
        s(MainState::Writing, SubPhase::End)
    );

    gate.borrow_mut().clear();
    rig.step_recording(10, &mut shown);
    assert_eq!(rig.controller.current_state(), PlaybackState::idle());
    assert_eq!(
        shown,
        vec![
            "idle.png".to_string(),
            "writing_start.png".to_string(),
            "writing_end.png".to_string(),
            "idle.png".to_string(),
        ]
    );
    assert_eq!(
        rig.visited(),
        vec![
            s(MainState::Writing, SubPhase::Start),
            s(MainState::Writing, SubPhase::End),
            PlaybackState::idle(),
        ]
    );
}
