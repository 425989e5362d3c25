// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The chat byte stream
//!
//! One HTTP body carries answer text interleaved with control markers for
//! tool activity and the continuation token. The transcoder writes it; the
//! decoder reads it back.

pub mod decoder;
pub mod frame;
pub mod transcoder;
pub mod wire;

pub use decoder::{DecodedTurn, StreamDecoder};
pub use frame::{StreamFrame, ToolActivity, ToolKind, ToolState, ToolTimeline};
pub use transcoder::{
    OpenBody, OutputSink, OutputStream, TranscodeOutcome, TranscodeReport, Transcoder, Upstream,
    APOLOGY,
};
