//! Diff and edge gating for container fires.

use crate::dispatch::matcher::strip_escapes;
use crate::dispatch::{Gate, Listener, OpenGate, Pulse};
use crate::event::FireEvent;

/// Gate used by every container fire.
///
/// For each path a listener cares about (its filter paths, or the firing
/// topics when it has none) the gate reads the current and prior values once
/// per fire, through the event's probe cache. A listener runs only if no path
/// fails its pulse condition and at least one path passes the diff check.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffGate;

impl Gate for DiffGate {
    fn should_fire(&self, listener: &Listener, topics: &[String], event: &mut FireEvent) -> bool {
        let params = listener.params();
        let paths: Vec<String> = if listener.filter().is_any() {
            topics.to_vec()
        } else {
            listener.filter().paths().iter().map(|p| strip_escapes(p)).collect()
        };
        // Edges need both sides of the transition.
        let edges = event.context.is_some() && event.prior_context.is_some();

        let (mut passes, mut failures) = (0_usize, 0_usize);
        for path in &paths {
            let probe = event.probe(path);
            if let (Some(pulse), true) = (params.pulse, edges) {
                let rising = probe.is_truthy() && !probe.was_truthy();
                let falling = !probe.is_truthy() && probe.was_truthy();
                match pulse {
                    Pulse::Falling if rising => failures += 1,
                    Pulse::Rising if falling => failures += 1,
                    _ => {}
                }
            }
            if !params.diff || probe.is_different {
                passes += 1;
            }
        }

        failures == 0 && passes > 0 && OpenGate.should_fire(listener, topics, event)
    }
}
