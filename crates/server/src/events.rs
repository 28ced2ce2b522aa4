use latentsync::ServerEvent;

/// Writes one session event to the log.
pub fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::PeerConnected { addr, .. } => {
            log::info!("Reliable connection from {}", addr);
        }
        ServerEvent::ClientRegistered {
            id,
            unreliable_addr,
            replaced,
        } => {
            if *replaced {
                log::warn!("Client {} re-registered from {}", id, unreliable_addr);
            } else {
                log::info!("Client {} registered (unreliable {})", id, unreliable_addr);
            }
        }
        ServerEvent::ClientRemoved { id, kicked } => {
            let reason = if *kicked { "kicked" } else { "disconnected" };
            log::info!("Client {} {}", id, reason);
        }
        ServerEvent::ClientReady {
            id,
            ready,
            expected,
        } => {
            log::info!("Client {} ready ({}/{})", id, ready, expected);
        }
        ServerEvent::SessionStarted { frame } => {
            log::info!("Round started at frame {}", frame);
        }
        ServerEvent::PlayerHit {
            shooter,
            target,
            health,
            killed,
        } => {
            if *killed {
                log::info!("{} eliminated {}", shooter, target);
            } else {
                log::info!("{} hit {} (health {:.2})", shooter, target, health);
            }
        }
        ServerEvent::RoundCompleted {
            rounds_played,
            progress,
        } => {
            log::info!(
                "Round {} complete ({:.0}% of session)",
                rounds_played,
                progress * 100.0
            );
        }
        ServerEvent::FeedbackReceived { id, submitted } => {
            log::info!("Feedback from {} ({} submitted)", id, submitted);
        }
        ServerEvent::RoundReset => log::info!("Next round"),
        ServerEvent::SessionEnded { rounds_played } => {
            log::info!("Session ended after {} rounds", rounds_played);
        }
        ServerEvent::Remote(action) => {
            log::debug!(
                "Action {:?} by {} at frame {} (local {})",
                action.action,
                action.actor,
                action.frame,
                action.local_frame
            );
        }
        ServerEvent::InputsComplete { frame, inputs } => {
            log::trace!("Frame {} has input from all {} clients", frame, inputs);
        }
        ServerEvent::Error { message } => log::error!("{}", message),
    }
}
