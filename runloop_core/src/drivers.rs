/// Externally owned state machines the runloop advances one step per
/// tick. The logic lives in the host; the runloop only dispatches on the
/// exposed status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayStatus {
    None,
    Alive,
    DeferredLoad,
    DeferredLoading,
    DeferredLoadingResolve,
    DeferredDone,
    DeferredError,
}

pub trait OverlayDriver: Send {
    fn status(&self) -> OverlayStatus;
    fn load_overlays(&mut self);
    fn load_iterate(&mut self);
    fn resolve_iterate(&mut self);
    fn finish_load(&mut self);
    fn unload(&mut self);
}

pub trait DbIndexWriter: Send {
    fn blocking(&self) -> bool;
    fn iterating(&self) -> bool;
    fn step(&mut self);
}

pub(crate) fn overlay_iterate(driver: &mut dyn OverlayDriver) {
    match driver.status() {
        OverlayStatus::None | OverlayStatus::Alive => {}
        OverlayStatus::DeferredLoad => driver.load_overlays(),
        OverlayStatus::DeferredLoading => driver.load_iterate(),
        OverlayStatus::DeferredLoadingResolve => driver.resolve_iterate(),
        OverlayStatus::DeferredDone => driver.finish_load(),
        OverlayStatus::DeferredError => driver.unload(),
    }
}

pub(crate) fn db_iterate(slot: &mut Option<Box<dyn DbIndexWriter>>) {
    let Some(writer) = slot.as_mut() else {
        return;
    };
    if writer.blocking() {
        return;
    }
    if !writer.iterating() {
        // Indexing is done; drop the writer so the slot reads empty.
        *slot = None;
        return;
    }
    writer.step();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingOverlay {
        status: OverlayStatus,
        calls: Vec<&'static str>,
    }

    impl OverlayDriver for RecordingOverlay {
        fn status(&self) -> OverlayStatus {
            self.status
        }

        fn load_overlays(&mut self) {
            self.calls.push("load");
        }

        fn load_iterate(&mut self) {
            self.calls.push("load_iterate");
        }

        fn resolve_iterate(&mut self) {
            self.calls.push("resolve_iterate");
        }

        fn finish_load(&mut self) {
            self.calls.push("finish");
        }

        fn unload(&mut self) {
            self.calls.push("unload");
        }
    }

    #[test]
    fn overlay_dispatch_matches_status() {
        let cases = [
            (OverlayStatus::None, None),
            (OverlayStatus::Alive, None),
            (OverlayStatus::DeferredLoad, Some("load")),
            (OverlayStatus::DeferredLoading, Some("load_iterate")),
            (OverlayStatus::DeferredLoadingResolve, Some("resolve_iterate")),
            (OverlayStatus::DeferredDone, Some("finish")),
            (OverlayStatus::DeferredError, Some("unload")),
        ];
        for (status, expected) in cases {
            let mut overlay = RecordingOverlay {
                status,
                calls: Vec::new(),
            };
            overlay_iterate(&mut overlay);
            match expected {
                Some(call) => assert_eq!(overlay.calls, vec![call]),
                None => assert!(overlay.calls.is_empty()),
            }
        }
    }

    struct CountingWriter {
        blocking: bool,
        rounds_left: usize,
        steps: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl DbIndexWriter for CountingWriter {
        fn blocking(&self) -> bool {
            self.blocking
        }

        fn iterating(&self) -> bool {
            self.rounds_left > 0
        }

        fn step(&mut self) {
            self.rounds_left -= 1;
            self.steps
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    #[test]
    fn db_writer_steps_then_detaches() {
        let steps = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut slot: Option<Box<dyn DbIndexWriter>> = Some(Box::new(CountingWriter {
            blocking: false,
            rounds_left: 3,
            steps: std::sync::Arc::clone(&steps),
        }));

        for _ in 0..3 {
            db_iterate(&mut slot);
            assert!(slot.is_some());
        }
        db_iterate(&mut slot);
        assert!(slot.is_none());
        assert_eq!(steps.load(std::sync::atomic::Ordering::Relaxed), 3);
    }

    #[test]
    fn blocking_db_writer_is_skipped() {
        let steps = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut slot: Option<Box<dyn DbIndexWriter>> = Some(Box::new(CountingWriter {
            blocking: true,
            rounds_left: 3,
            steps: std::sync::Arc::clone(&steps),
        }));

        db_iterate(&mut slot);
        assert!(slot.is_some());
        assert_eq!(steps.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}
