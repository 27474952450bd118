//! Writer loop that drains a session queue into its transport.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, SinkExt};
use tracing::{debug, warn};

use super::close::CloseReason;
use super::handle::{SessionHandle, SessionState};
use crate::message::serializer::serialize_outbound;

/// Drain `session`'s queue into `sink` until the queue is closed and empty.
///
/// `MESSAGE` frames for topics the session has since left are skipped.
/// A transport failure closes the session. Returns the close reason to
/// put in the final close frame, if the session has one; a draining
/// session reports a shutdown.
pub async fn run_writer<S>(session: Arc<SessionHandle>, mut sink: S) -> Option<CloseReason>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = session.queue().pop().await {
        let left = frame
            .topic_message()
            .is_some_and(|(topic, _)| !session.is_subscribed(topic));
        if left {
            continue;
        }

        let text = match serialize_outbound(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to serialize outbound frame");
                continue;
            }
        };

        if let Err(e) = sink.send(text).await {
            debug!(session_id = %session.id, error = %e, "Transport write failed");
            session.mark_closed(CloseReason::client_gone());
            break;
        }
    }

    // A drained session is closed only after its writer finishes.
    session.close_reason().or_else(|| {
        (session.state() == SessionState::Draining).then(CloseReason::shutdown)
    })
}
