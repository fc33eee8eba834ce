//! Control messages and the shared stimulus
//!
//! Control channel trouble never fails a call: send errors are logged and
//! reported as events, undecodable payloads are dropped by the channel.

use tracing::{debug, info, warn};

use super::manager::{forward, SessionCore, SessionInput};
use crate::control::{AttachedLink, ControlMessage, LinkId};
use crate::error::{ClientError, ClientResult};
use crate::events::MediaEventType;
use crate::identity::LocalIdentity;
use crate::substrate::{DataEvent, DataLink};

impl SessionCore {
    /// Send a message chosen by the local user
    pub(super) fn send_control(&mut self, message: ControlMessage) -> ClientResult<()> {
        if message.controls_stimulus() && !self.config.role.controls_stimulus() {
            return Err(ClientError::NotPermitted {
                action: message.to_string(),
                required: "therapist".into(),
            });
        }
        if let ControlMessage::Settings(settings) = &message {
            settings.validate()?;
        }
        let Some(remote) = self.current_remote().cloned() else {
            return Err(ClientError::invalid_state("no active call"));
        };

        self.deliver(&remote, &message);
        match message {
            ControlMessage::StimulusStart => self.arm_stimulus(),
            ControlMessage::StimulusStop => self.stop_stimulus(),
            ControlMessage::Settings(settings) => self.stimulus.apply_settings(settings),
            ControlMessage::VideoEnabled(_) => {}
        }
        Ok(())
    }

    /// Best-effort notification to the counterparty of the active call
    pub(super) fn announce(&mut self, message: ControlMessage) {
        match self.current_remote().cloned() {
            Some(remote) => self.deliver(&remote, &message),
            None => debug!(message = %message, "No active call to notify"),
        }
    }

    fn deliver(&mut self, remote: &LocalIdentity, message: &ControlMessage) {
        self.open_control_channel(remote);
        if let Err(e) = self.control.send(remote, message) {
            warn!(remote = %remote, message = %message, error = %e, "Control message not sent");
            let call_id = self.call.as_ref().map(|c| c.info.call_id);
            self.events.error(e.into(), call_id);
        }
    }

    /// Make sure a channel to `remote` exists, opening one if needed
    pub(super) fn open_control_channel(&mut self, remote: &LocalIdentity) {
        match self.control.open(remote, self.registration.as_deref()) {
            Ok(Some(attached)) => self.pump_data_link(attached),
            Ok(None) => {}
            Err(e) => warn!(remote = %remote, error = %e, "Could not open control channel"),
        }
    }

    /// Adopt a data connection the counterparty opened
    pub(super) fn attach_data_link(&mut self, remote: LocalIdentity, link: DataLink) {
        let attached = self.control.attach(remote, link);
        self.pump_data_link(attached);
    }

    fn pump_data_link(&mut self, attached: AttachedLink) {
        let AttachedLink {
            remote,
            link_id,
            events,
        } = attached;
        let task = forward(events, self.inputs.clone(), move |event| SessionInput::Data {
            remote: remote.clone(),
            link_id,
            event,
        });
        self.track_task(task);
    }

    pub(super) fn handle_data_event(
        &mut self,
        remote: LocalIdentity,
        link_id: LinkId,
        event: DataEvent,
    ) {
        let Some(message) = self.control.handle_event(&remote, link_id, event) else {
            return;
        };
        self.events.control_message(&remote, &message);

        match message {
            ControlMessage::StimulusStart => self.arm_stimulus(),
            ControlMessage::StimulusStop => self.stop_stimulus(),
            ControlMessage::VideoEnabled(enabled) => {
                self.remote_video_enabled = enabled;
                let call_id = self.call.as_ref().map(|c| c.info.call_id);
                self.events
                    .media(call_id, MediaEventType::RemoteVideoChanged { enabled });
            }
            ControlMessage::Settings(settings) => {
                info!(
                    color = %settings.color,
                    size = settings.size,
                    duration_secs = settings.duration_seconds,
                    "Stimulus settings updated by counterparty"
                );
                self.stimulus.apply_settings(settings);
            }
        }
    }

    fn arm_stimulus(&mut self) {
        let inputs = self.inputs.clone();
        self.stimulus.arm(move |generation, duration| {
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let _ = inputs.send(SessionInput::StimulusExpired { generation });
            })
        });
        self.stimulus_changed(true);
    }

    pub(super) fn stop_stimulus(&mut self) {
        if self.stimulus.stop() {
            self.stimulus_changed(false);
        }
    }

    pub(super) fn handle_stimulus_expired(&mut self, generation: u64) {
        if self.stimulus.expire(generation) {
            self.stimulus_changed(false);
        }
    }

    fn stimulus_changed(&self, active: bool) {
        let call_id = self.call.as_ref().map(|c| c.info.call_id);
        self.events
            .media(call_id, MediaEventType::StimulusChanged { active });
    }
}
