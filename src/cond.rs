use std::fmt;

use crate::lines::Position;

/// Which directive opened or last advanced a frame.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FrameKind { If, Ifdef, Ifndef, Elif, Else }

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BranchState {
    /// No branch of the chain has been taken yet; the current one is skipped.
    BeforeAnyTrueBranch,
    /// The current branch is the taken one.
    InActiveBranch,
    /// An earlier branch was taken; the current one is skipped.
    AfterActiveBranch,
    /// The whole chain is nested in a skipped group.
    Suppressed,
}

/// One `#if` ... `#endif` chain.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Frame {
    pub kind: FrameKind,
    pub state: BranchState,
    pub has_else: bool,
    /// The `#if`, `#ifdef` or `#ifndef` that opened the chain.
    pub opened: Position,
}

/// Why a conditional directive does not fit the open chain.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mismatch { NoConditional, AfterElse }

/// Open conditional chains, innermost last.
#[derive(Default, Debug)]
pub struct ConditionalStack { frames: Vec<Frame> }

impl BranchState {
    pub fn is_active(self) -> bool { self == BranchState::InActiveBranch }

    /// Whether some branch of the chain has been taken.
    pub fn is_taken(self) -> bool {
        matches!(self, BranchState::InActiveBranch | BranchState::AfterActiveBranch)
    }

    /// Whether an `#elif` in this state has its condition evaluated.
    pub fn wants_condition(self) -> bool { self == BranchState::BeforeAnyTrueBranch }
}

impl ConditionalStack {
    pub fn new() -> ConditionalStack { ConditionalStack::default() }

    /// Whether lines at this point are kept: every open frame is in its active branch.
    pub fn is_active(&self) -> bool { self.frames.iter().all(|frame| frame.state.is_active()) }

    pub fn depth(&self) -> usize { self.frames.len() }

    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    pub fn innermost(&self) -> Option<&Frame> { self.frames.last() }

    pub fn frames(&self) -> &[Frame] { &self.frames }

    /// Push a frame for `#if`, `#ifdef` or `#ifndef`.
    ///
    /// The frame starts out `BeforeAnyTrueBranch` if the enclosing lines are active, and
    /// `Suppressed` otherwise, in which case the condition must not be evaluated.
    pub fn open(&mut self, kind: FrameKind, opened: Position) -> BranchState {
        let state = if self.is_active() {
            BranchState::BeforeAnyTrueBranch
        } else {
            BranchState::Suppressed
        };
        self.frames.push(Frame { kind, state, has_else: false, opened });
        state
    }

    /// Advance the innermost frame to an `#elif`.
    ///
    /// A chain that has taken a branch moves to `AfterActiveBranch`. The returned state is
    /// `BeforeAnyTrueBranch` exactly when the `#elif` condition must be evaluated, after which
    /// the caller reports a true result with [`ConditionalStack::enter`].
    pub fn alternative(&mut self) -> Result<BranchState, Mismatch> {
        let frame = self.frames.last_mut().ok_or(Mismatch::NoConditional)?;
        if frame.has_else { return Err(Mismatch::AfterElse); }

        frame.kind = FrameKind::Elif;
        if frame.state.is_taken() { frame.state = BranchState::AfterActiveBranch; }
        Ok(frame.state)
    }

    /// Make the innermost frame's current branch the taken one.
    pub fn enter(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.state == BranchState::BeforeAnyTrueBranch {
                frame.state = BranchState::InActiveBranch;
            }
        }
    }

    /// Advance the innermost frame to its `#else`: an `#elif` whose condition is always true.
    pub fn otherwise(&mut self) -> Result<BranchState, Mismatch> {
        let frame = self.frames.last_mut().ok_or(Mismatch::NoConditional)?;
        if frame.has_else { return Err(Mismatch::AfterElse); }

        frame.kind = FrameKind::Else;
        frame.has_else = true;
        frame.state = match frame.state {
            BranchState::BeforeAnyTrueBranch => { BranchState::InActiveBranch }
            BranchState::InActiveBranch | BranchState::AfterActiveBranch => {
                BranchState::AfterActiveBranch
            }
            BranchState::Suppressed => { BranchState::Suppressed }
        };
        Ok(frame.state)
    }

    /// Pop the innermost frame for `#endif`.
    pub fn close(&mut self) -> Result<Frame, Mismatch> {
        self.frames.pop().ok_or(Mismatch::NoConditional)
    }

    pub fn clear(&mut self) { self.frames.clear(); }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            FrameKind::If => { "#if" }
            FrameKind::Ifdef => { "#ifdef" }
            FrameKind::Ifndef => { "#ifndef" }
            FrameKind::Elif => { "#elif" }
            FrameKind::Else => { "#else" }
        };
        f.write_str(name)
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            BranchState::BeforeAnyTrueBranch => { "skipped" }
            BranchState::InActiveBranch => { "taken" }
            BranchState::AfterActiveBranch => { "skipped (already taken)" }
            BranchState::Suppressed => { "suppressed" }
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConditionalStack, FrameKind, BranchState, Mismatch};
    use crate::lines::Position;

    fn at(line: u32) -> Position { Position { line, column: 1 } }

    #[test]
    fn chain() {
        let stack = &mut ConditionalStack::new();
        assert!(stack.is_active());

        assert_eq!(stack.open(FrameKind::If, at(1)), BranchState::BeforeAnyTrueBranch);
        assert!(!stack.is_active());

        assert_eq!(stack.alternative(), Ok(BranchState::BeforeAnyTrueBranch));
        stack.enter();
        assert!(stack.is_active());

        assert_eq!(stack.alternative(), Ok(BranchState::AfterActiveBranch));
        assert!(!stack.is_active());
        assert_eq!(stack.otherwise(), Ok(BranchState::AfterActiveBranch));
        assert_eq!(stack.otherwise(), Err(Mismatch::AfterElse));
        assert_eq!(stack.alternative(), Err(Mismatch::AfterElse));

        let frame = stack.close().unwrap();
        assert_eq!((frame.kind, frame.opened, frame.has_else), (FrameKind::Else, at(1), true));
        assert!(stack.is_empty());
        assert_eq!(stack.close(), Err(Mismatch::NoConditional));
        assert_eq!(stack.alternative(), Err(Mismatch::NoConditional));
        assert_eq!(stack.otherwise(), Err(Mismatch::NoConditional));
    }

    #[test]
    fn else_taken() {
        let stack = &mut ConditionalStack::new();
        stack.open(FrameKind::Ifdef, at(1));
        assert_eq!(stack.otherwise(), Ok(BranchState::InActiveBranch));
        assert!(stack.is_active());
        stack.enter();
        assert_eq!(stack.innermost().map(|frame| frame.state), Some(BranchState::InActiveBranch));
    }

    #[test]
    fn suppressed() {
        let stack = &mut ConditionalStack::new();
        stack.open(FrameKind::If, at(1));
        assert_eq!(stack.open(FrameKind::Ifndef, at(2)), BranchState::Suppressed);

        assert_eq!(stack.alternative(), Ok(BranchState::Suppressed));
        stack.enter();
        assert_eq!(stack.otherwise(), Ok(BranchState::Suppressed));
        assert!(!stack.is_active());
        assert_eq!(stack.depth(), 2);

        stack.close().unwrap();
        assert_eq!(stack.otherwise(), Ok(BranchState::InActiveBranch));
        assert!(stack.is_active());
        stack.close().unwrap();
        assert!(stack.is_empty());
    }
}
