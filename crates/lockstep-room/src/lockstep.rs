//! The frame log.
//!
//! Commands pushed between two ticks land in the frame currently being
//! filled (index `frame_count()`). A tick seals that frame and opens the
//! next. Frames nobody sent input for are never materialized.

use std::collections::HashMap;

use lockstep_protocol::{InputCommand, PlayerId};

/// One sealed or in-progress frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    index: u32,
    commands: Vec<InputCommand>,
}

impl Frame {
    fn new(index: u32) -> Self {
        Self {
            index,
            commands: Vec::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Commands in arrival order.
    pub fn commands(&self) -> &[InputCommand] {
        &self.commands
    }

    pub fn has_command_from(&self, player: PlayerId) -> bool {
        self.commands.iter().any(|c| c.player_id == player)
    }
}

/// Append-only, frame-indexed command buffer.
#[derive(Debug, Default)]
pub struct LockstepEngine {
    frames: HashMap<u32, Frame>,
    frame_count: u32,
}

impl LockstepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every frame and starts over at frame 0.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.frame_count = 0;
    }

    /// Seals the current frame. Returns the new frame count.
    pub fn tick(&mut self) -> u32 {
        self.frame_count += 1;
        self.frame_count
    }

    /// Adds a command to the frame being filled.
    ///
    /// Returns `false` (and leaves the frame untouched) if that player
    /// already has a command in it.
    pub fn push_command(&mut self, command: InputCommand) -> bool {
        let index = self.frame_count;
        let frame = self.frames.entry(index).or_insert_with(|| Frame::new(index));
        if frame.has_command_from(command.player_id) {
            return false;
        }
        frame.commands.push(command);
        true
    }

    /// The frame at `index`, or `None` if nobody sent input in it.
    pub fn frame(&self, index: u32) -> Option<&Frame> {
        self.frames.get(&index)
    }

    /// Number of sealed frames. Also the index of the frame being filled.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(player: u64, sid: i32) -> InputCommand {
        InputCommand {
            player_id: PlayerId(player),
            sid,
            x: 1,
            y: -1,
            seat: player as u32,
        }
    }

    #[test]
    fn test_one_command_per_player_per_frame() {
        let mut engine = LockstepEngine::new();
        assert!(engine.push_command(cmd(1, 1)));
        assert!(engine.push_command(cmd(2, 1)));
        assert!(!engine.push_command(cmd(1, 2)));

        let frame = engine.frame(0).unwrap();
        assert_eq!(frame.commands(), &[cmd(1, 1), cmd(2, 1)]);
    }

    #[test]
    fn test_tick_opens_a_new_frame() {
        let mut engine = LockstepEngine::new();
        assert!(engine.push_command(cmd(1, 1)));
        assert_eq!(engine.tick(), 1);
        assert!(engine.push_command(cmd(1, 2)));

        assert_eq!(engine.frame(0).unwrap().commands(), &[cmd(1, 1)]);
        assert_eq!(engine.frame(1).unwrap().commands(), &[cmd(1, 2)]);
        assert_eq!(engine.frame(1).unwrap().index(), 1);
    }

    #[test]
    fn test_n_ticks_give_n_frames() {
        let mut engine = LockstepEngine::new();
        for i in 0..10u32 {
            if i % 3 == 0 {
                engine.push_command(cmd(1, i as i32));
            }
            engine.tick();
        }
        assert_eq!(engine.frame_count(), 10);
        for i in 0..10u32 {
            assert_eq!(engine.frame(i).is_some(), i % 3 == 0, "frame {i}");
        }
        assert!(engine.frame(10).is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut engine = LockstepEngine::new();
        engine.push_command(cmd(1, 1));
        engine.tick();
        engine.tick();
        engine.reset();
        assert_eq!(engine.frame_count(), 0);
        assert!(engine.frame(0).is_none());
        assert!(engine.push_command(cmd(1, 1)));
    }
}
