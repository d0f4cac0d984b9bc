//! Runnable demos for `playback-sync`; see `examples/`.
