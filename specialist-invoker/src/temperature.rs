//! Named temperature constants per role. Kept as compiled-in constants
//! rather than config, alongside the other prompt constants.

/// Image analysis: near-deterministic.
pub const IMAGE_ANALYSIS: f32 = 0.1;
/// Structured JSON extraction (labs, schema-hinted fallback).
pub const STRUCTURED_JSON: f32 = 0.3;
/// Debate synthesis when the specialist is driving alone (no orchestrator).
pub const DEBATE_SYNTHESIS_SPECIALIST_ONLY: f32 = 0.4;
/// Debate synthesis when the orchestrator is composing with the specialist;
/// more exploratory since the orchestrator reconciles the result.
pub const DEBATE_SYNTHESIS_ORCHESTRATED: f32 = 0.7;
/// Refusal-recovery retries run colder than the original attempt.
pub const REFUSAL_RETRY: f32 = 0.05;
