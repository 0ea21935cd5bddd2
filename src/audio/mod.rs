//! Audio plumbing: the PCM codec, device seams, and concrete devices.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod device;
pub mod frame;
#[cfg(feature = "cpal-audio")]
pub mod output;
pub mod pcm;
pub mod wav;

pub use device::{
    AudioBackend, DeviceFault, DeviceRole, InputDevice, MockAudioBackend, MockInputDevice,
    MockOutputDevice, MockOutputHandle, OutputDevice, ResourceCounter, ScheduledSource,
};
pub use frame::{AudioBuffer, AudioFrame, EncodedPacket, SourceId};
pub use pcm::{DecodeError, decode_buffer, decode_frame, encode_frame};
pub use wav::WavInputDevice;

#[cfg(feature = "cpal-audio")]
pub use capture::{CpalInputDevice, list_input_devices};
#[cfg(feature = "cpal-audio")]
pub use output::{CpalBackend, CpalOutputDevice, list_output_devices};
