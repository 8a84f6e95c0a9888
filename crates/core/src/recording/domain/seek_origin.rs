/// Reference point for a playback seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Offset from the first record of the recording.
    Begin,
    /// Offset from the last timestamp; must be zero or negative.
    End,
    /// The offset is an absolute device timestamp.
    DeviceTime,
}
