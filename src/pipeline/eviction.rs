//! Relaxed-cadence trimming of every frame buffer

use std::ops::ControlFlow;

use tracing::{debug, info, instrument};

use super::buffer::FrameStore;
use super::pacing::Pacer;
use super::shutdown::Shutdown;
use super::viewer::ViewerRegistry;
use crate::clock::Clock;

/// Trims each source's buffer up to its slowest cursor. Returns the number
/// of frames dropped.
pub fn evict_all(registry: &ViewerRegistry, store: &FrameStore) -> usize {
    store.buffers().map(|buffer| registry.evict(buffer)).sum()
}

#[instrument(name = "eviction", skip_all)]
pub fn run_eviction_loop<C: Clock>(
    registry: &ViewerRegistry,
    store: &FrameStore,
    mut pacer: Pacer<C>,
    shutdown: &Shutdown,
) {
    info!(
        interval_ms = pacer.interval().as_millis() as u64,
        "eviction loop started"
    );
    pacer.run(shutdown, |_| {
        let removed = evict_all(registry, store);
        if removed > 0 {
            debug!(removed, "eviction pass");
        }
        ControlFlow::Continue(())
    });
    info!("eviction loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SourceId;
    use crate::clock::ManualClock;
    use crate::pipeline::buffer::tests::test_frame;
    use crate::pipeline::update_cursors;
    use crate::pipeline::ViewerSettings;
    use std::time::Duration;

    #[test]
    fn sources_are_trimmed_independently() {
        let clock = ManualClock::new();
        let mut store = FrameStore::new();
        let watched = store.register(SourceId(0), 10.0);
        let idle = store.register(SourceId(1), 10.0);
        for i in 0..30 {
            watched.append(test_frame(i), clock.at(i as f64 * 0.1));
            idle.append(test_frame(i), clock.at(i as f64 * 0.1));
        }

        let registry = ViewerRegistry::new();
        let id = registry
            .add(ViewerSettings::new(Duration::from_secs(1), 10.0, SourceId(0)), &store)
            .unwrap();
        update_cursors(&registry, &store, clock.at(2.9));

        let removed = evict_all(&registry, &store);
        let cursor = registry.get(id).unwrap().cursor().position().unwrap();
        assert_eq!(watched.head(), Some(cursor));
        // Nobody watches source 1, so only its newest frame survives
        assert_eq!(idle.len(), 1);
        assert_eq!(removed, cursor.index() as usize + 29);
    }

    #[derive(Clone, Default)]
    struct SpanNames(std::sync::Arc<parking_lot::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanNames {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _: &tracing::span::Id,
            _: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().push(attrs.metadata().name().to_string());
        }
    }

    #[test]
    fn loop_runs_inside_its_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let names = SpanNames::default();
        let subscriber = tracing_subscriber::registry().with(names.clone());
        tracing::subscriber::with_default(subscriber, || {
            let clock = ManualClock::new();
            let shutdown = Shutdown::new();
            shutdown.trigger(crate::pipeline::ShutdownReason::UserQuit);
            run_eviction_loop(
                &ViewerRegistry::new(),
                &FrameStore::new(),
                Pacer::new(clock, Duration::from_millis(5)),
                &shutdown,
            );
        });
        assert!(names.0.lock().iter().any(|name| name == "eviction"));
    }
}
