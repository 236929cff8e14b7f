//! Render surface lifecycle integration tests: one surface across mounts,
//! reattachment, grace-period teardown and initialization failures.

#![allow(dead_code, unused_imports)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use aberredavatar::error::AvatarError;
use aberredavatar::resources::surface::{
    AttachStatus, MountId, RenderSurface, RenderSurfaceManager, SpriteTransform, SurfaceBackend,
    SurfaceConfig,
};
use aberredavatar::systems::sequence::Visual;

/// Records what the manager did to it.
#[derive(Default)]
struct RecordingSurface {
    mount: Option<MountId>,
    size: (u32, u32),
    pixel_ratio: f32,
    presented: u64,
    attach_log: Rc<RefCell<Vec<MountId>>>,
}

impl RenderSurface for RecordingSurface {
    fn attach_to(&mut self, mount: MountId) {
        self.mount = Some(mount);
        self.attach_log.borrow_mut().push(mount);
    }
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }
    fn set_pixel_ratio(&mut self, pixel_ratio: f32) {
        self.pixel_ratio = pixel_ratio;
    }
    fn present(&mut self, _: &Visual, _: SpriteTransform) {
        self.presented += 1;
    }
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn mount(&self) -> Option<MountId> {
        self.mount
    }
    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }
    fn presented(&self) -> u64 {
        self.presented
    }
}

/// Counts creations; fails while `failures` is non-zero.
struct CountingBackend {
    created: Rc<Cell<usize>>,
    failures: Rc<Cell<usize>>,
    attach_log: Rc<RefCell<Vec<MountId>>>,
}

impl SurfaceBackend for CountingBackend {
    fn create(&mut self, config: &SurfaceConfig) -> Result<Box<dyn RenderSurface>, String> {
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err("context lost".into());
        }
        self.created.set(self.created.get() + 1);
        Ok(Box::new(RecordingSurface {
            size: (config.width, config.height),
            pixel_ratio: config.pixel_ratio,
            attach_log: Rc::clone(&self.attach_log),
            ..Default::default()
        }))
    }
}

struct Rig {
    manager: RenderSurfaceManager,
    created: Rc<Cell<usize>>,
    failures: Rc<Cell<usize>>,
    attach_log: Rc<RefCell<Vec<MountId>>>,
}

fn rig() -> Rig {
    let created = Rc::new(Cell::new(0));
    let failures = Rc::new(Cell::new(0));
    let attach_log = Rc::new(RefCell::new(Vec::new()));
    let backend = CountingBackend {
        created: Rc::clone(&created),
        failures: Rc::clone(&failures),
        attach_log: Rc::clone(&attach_log),
    };
    let config = SurfaceConfig {
        width: 300,
        height: 200,
        pixel_ratio: 1.0,
        teardown_grace: 0.1,
    };
    Rig {
        manager: RenderSurfaceManager::new(Box::new(backend), config),
        created,
        failures,
        attach_log,
    }
}

const A: MountId = MountId(1);
const B: MountId = MountId(2);
const C: MountId = MountId(3);

#[test]
fn concurrent_attaches_create_one_surface() {
    let mut rig = rig();
    let ha = rig.manager.attach(A);
    let hb = rig.manager.attach(B);
    let hc = rig.manager.attach(C);
    assert!(ha.shares_slot_with(&hb));
    assert!(hb.shares_slot_with(&hc));
    assert!(matches!(ha.poll(), AttachStatus::Pending));
    assert!(rig.manager.is_initializing());

    rig.manager.complete_initialization().unwrap();
    assert!(ha.is_attached() && hb.is_attached() && hc.is_attached());
    assert_eq!(rig.created.get(), 1);
    assert_eq!(rig.manager.surfaces_created(), 1);
    assert_eq!(rig.manager.active_mount(), Some(C));
    assert_eq!(rig.manager.surface().unwrap().mount(), Some(C));

    // Completing again is a no-op.
    rig.manager.complete_initialization().unwrap();
    assert_eq!(rig.created.get(), 1);
}

#[test]
fn output_follows_the_most_recent_mount() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.complete_initialization().unwrap();

    let hb = rig.manager.attach(B);
    assert!(hb.is_attached());
    assert_eq!(rig.manager.surface().unwrap().mount(), Some(B));

    rig.manager.detach(B);
    assert_eq!(rig.manager.surface().unwrap().mount(), Some(A));
    assert!(!rig.manager.teardown_pending());
    assert_eq!(*rig.attach_log.borrow(), vec![A, B, A]);
}

#[test]
fn detaching_an_inactive_mount_keeps_output_in_place() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.attach(B);
    rig.manager.complete_initialization().unwrap();

    rig.manager.detach(A);
    assert_eq!(rig.manager.surface().unwrap().mount(), Some(B));
    assert_eq!(*rig.attach_log.borrow(), vec![B]);
}

#[test]
fn last_detach_tears_down_after_the_grace_period() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.complete_initialization().unwrap();

    rig.manager.detach(A);
    assert!(rig.manager.teardown_pending());
    rig.manager.update(0.05);
    assert!(rig.manager.is_live());

    rig.manager.update(0.06);
    assert!(!rig.manager.is_live());
    assert!(!rig.manager.teardown_pending());
    assert_eq!(rig.manager.teardowns(), 1);
}

#[test]
fn reattach_within_grace_keeps_the_surface() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.complete_initialization().unwrap();

    rig.manager.detach(A);
    rig.manager.update(0.05);
    let hb = rig.manager.attach(B);
    assert!(hb.is_attached());
    assert!(!rig.manager.teardown_pending());

    rig.manager.update(1.0);
    assert!(rig.manager.is_live());
    assert_eq!(rig.created.get(), 1);
    assert_eq!(rig.manager.teardowns(), 0);
    assert_eq!(rig.manager.surface().unwrap().mount(), Some(B));
}

#[test]
fn attach_after_teardown_creates_a_fresh_surface() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.complete_initialization().unwrap();
    rig.manager.detach(A);
    rig.manager.update(0.2);

    let ha = rig.manager.attach(A);
    assert!(matches!(ha.poll(), AttachStatus::Pending));
    rig.manager.complete_initialization().unwrap();
    assert!(ha.is_attached());
    assert_eq!(rig.created.get(), 2);
}

#[test]
fn resize_applies_only_from_the_active_mount() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.attach(B);
    rig.manager.complete_initialization().unwrap();

    rig.manager.resize(A, 640, 480);
    assert_eq!(rig.manager.surface().unwrap().size(), (300, 200));
    rig.manager.resize(B, 640, 480);
    assert_eq!(rig.manager.surface().unwrap().size(), (640, 480));
    rig.manager.resize(B, 0, 480);
    assert_eq!(rig.manager.surface().unwrap().size(), (640, 480));
}

#[test]
fn pixel_ratio_reaches_the_live_surface() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.complete_initialization().unwrap();
    rig.manager.set_pixel_ratio(2.0);
    assert_eq!(rig.manager.surface().unwrap().pixel_ratio(), 2.0);
    rig.manager.set_pixel_ratio(f32::NAN);
    assert_eq!(rig.manager.surface().unwrap().pixel_ratio(), 2.0);
}

#[test]
fn failed_initialization_rejects_waiters_and_allows_retry() {
    let mut rig = rig();
    rig.failures.set(1);
    let ha = rig.manager.attach(A);
    let hb = rig.manager.attach(B);

    let err = rig.manager.complete_initialization().unwrap_err();
    assert_eq!(err, AvatarError::surface_init("context lost"));
    for handle in [&ha, &hb] {
        assert!(matches!(handle.poll(), AttachStatus::Failed(AvatarError::SurfaceInitFailed(_))));
    }
    assert!(rig.manager.mounts().is_empty());
    assert!(!rig.manager.is_initializing());

    let retry = rig.manager.attach(A);
    assert!(!retry.shares_slot_with(&ha));
    rig.manager.complete_initialization().unwrap();
    assert!(retry.is_attached());
    assert_eq!(rig.created.get(), 1);
}

#[test]
fn detach_before_initialization_discards_the_result() {
    let mut rig = rig();
    let ha = rig.manager.attach(A);
    rig.manager.detach(A);

    rig.manager.complete_initialization().unwrap();
    assert!(matches!(ha.poll(), AttachStatus::Cancelled));
    assert_eq!(rig.created.get(), 0);
    assert!(!rig.manager.is_live());
}

#[test]
fn present_draws_only_while_mounted() {
    let mut rig = rig();
    rig.manager.attach(A);
    rig.manager.present(&Visual::Empty, None);
    rig.manager.complete_initialization().unwrap();

    rig.manager.present(&Visual::Fallback, None);
    rig.manager.present(&Visual::Fallback, Some((50.0, 50.0)));
    assert_eq!(rig.manager.surface().unwrap().presented(), 2);

    rig.manager.detach(A);
    rig.manager.present(&Visual::Fallback, None);
    assert_eq!(rig.manager.surface().unwrap().presented(), 2);
}
