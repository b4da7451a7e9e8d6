use copilot_core::{
    ChatRole, MessageMeta, Phase, StreamHandle, StreamOutcome, TranscriptController,
};

pub struct App {
    pub should_quit: bool,
    pub controller: TranscriptController,
    pub base_url: String,
    /// Most recent accepted send; awaited on shutdown
    stream: Option<StreamHandle>,

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Transcript pane
    pub scroll: u16,
    pub max_scroll: u16,
    pub follow: bool, // keep the newest line in view while streaming
    pub chat_height: u16,

    pub status: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(controller: TranscriptController, base_url: String) -> Self {
        Self {
            should_quit: false,
            controller,
            base_url,
            stream: None,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            max_scroll: 0,
            follow: true,
            chat_height: 0,
            status: None,
            animation_frame: 0,
        }
    }

    pub fn tick_animation(&mut self) {
        self.animation_frame = (self.animation_frame + 1) % 3;
    }

    /// Send the input box contents. Keeps the input when the send is rejected.
    pub fn submit(&mut self) {
        if self.input.trim().is_empty() {
            return;
        }

        if let Some(handle) = self.controller.send(&self.input) {
            self.stream = Some(handle);
            self.input.clear();
            self.cursor = 0;
            self.status = None;
            self.follow = true;
        } else {
            self.status = Some("Still answering - press Esc to stop it first".to_string());
        }
    }

    pub fn cancel(&mut self) {
        if self.controller.cancel() {
            self.status = Some("Stopped".to_string());
        }
    }

    pub fn clear(&mut self) {
        self.controller.clear();
        self.scroll = 0;
        self.follow = true;
        self.status = Some("Conversation cleared".to_string());
    }

    /// Stop any active stream and wait until its partial answer is saved.
    pub async fn shutdown(&mut self) -> Option<StreamOutcome> {
        self.controller.cancel();
        let handle = self.stream.take()?;
        Some(handle.finished().await)
    }

    pub fn on_finished(&mut self, outcome: StreamOutcome) {
        self.status = match outcome {
            StreamOutcome::Completed => None,
            StreamOutcome::Failed => Some("The co-pilot reported an error".to_string()),
            StreamOutcome::Cancelled => Some("Stopped".to_string()),
        };
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = (self.scroll + lines).min(self.max_scroll);
        if self.scroll == self.max_scroll {
            self.follow = true;
        }
    }

    pub fn phase(&self) -> Phase {
        self.controller.phase()
    }

    /// Meta of the newest assistant reply, for the footer
    pub fn latest_meta(&self) -> Option<MessageMeta> {
        self.controller.read(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::Assistant)
                .and_then(|m| m.meta.clone())
        })
    }
}
