//! Async host for a [`Localizer`].
//!
//! One task owns the localizer and drains a single command channel, so every
//! event and configuration change is applied strictly in arrival order.
//! With loop-back on, every emitted pose is fed straight back in as fused
//! pose feedback, for replays recorded without an external fusion stage.

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sensor_fusion::{ConfigUpdate, FusionEvent, InputEvent, Localizer, TimedEvent};

#[derive(Clone, Debug)]
pub enum Command {
    Event(TimedEvent),
    Configure(ConfigUpdate),
}

/// Spawn the localizer task. It runs until every command sender is dropped
/// and then hands the localizer back for final inspection.
pub fn spawn_localizer(
    mut localizer: Localizer,
    mut commands: mpsc::Receiver<Command>,
    outputs: mpsc::Sender<FusionEvent>,
    loop_back: bool,
) -> JoinHandle<Localizer> {
    tokio::spawn(async move {
        let mut sink_open = true;
        while let Some(command) = commands.recv().await {
            let events = match command {
                Command::Event(event) => {
                    let events = localizer.dispatch_timed(&event);
                    if loop_back {
                        feed_back_poses(&mut localizer, events)
                    } else {
                        events
                    }
                }
                Command::Configure(update) => {
                    if let Err(e) = localizer.apply_config(update) {
                        warn!("config update rejected: {}", e);
                    }
                    continue;
                }
            };
            if !sink_open {
                continue;
            }
            for event in events {
                if outputs.send(event).await.is_err() {
                    debug!("output receiver dropped, discarding further events");
                    sink_open = false;
                    break;
                }
            }
        }
        localizer
    })
}

/// Each pose is followed by whatever its own feedback produced.
fn feed_back_poses(localizer: &mut Localizer, events: Vec<FusionEvent>) -> Vec<FusionEvent> {
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        let feedback = match &event {
            FusionEvent::Pose(p) => Some((InputEvent::PoseFeedback(p.into()), p.timestamp)),
            _ => None,
        };
        out.push(event);
        if let Some((feedback, now)) = feedback {
            out.extend(localizer.dispatch(&feedback, now));
        }
    }
    out
}
