//! Purpose: Internal JSON parsing boundary shared by runtime callsites.
//! Exports: `parse` module with decode helpers used by the normalizer and SOAP decoding.
//! Role: Single seam for parser details so callsites avoid ad hoc decode logic.
//! Invariants: Helper APIs stay small and deterministic (no hidden global state).

pub(crate) mod parse;
