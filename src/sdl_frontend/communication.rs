use rustyboi_advance_core::InputKey;

/// Messages from the UI thread to the emulator thread.
#[derive(Debug)]
pub enum EmulatorNotification {
    KeyDown(InputKey),
    KeyUp(InputKey),
    /// Hand over a buffer for the emulator to fill with samples; it comes
    /// back via `EmulatorResponse::Audio` to avoid reallocating every frame.
    AudioRequest(Vec<f32>),
    SaveState(u8),
    LoadState(u8),
    ExitRequest,
}

/// Messages from the emulator thread back to the UI thread.
#[derive(Debug)]
pub enum EmulatorResponse {
    Audio(Vec<f32>),
}
