//! Windows audio device directory via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list render and capture endpoints with
//! friendly names, and resolves an endpoint ID to a capturable device
//! carrying its native mix format.

use windows::core::{Interface, PCWSTR};
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::*;

use loopback_stream_core::{
    CaptureDeviceRef, DeviceDirectory, EndpointFlow, EndpointInfo, EndpointListing, EndpointState,
    SampleEncoding, StreamError, WaveFormat,
};

use crate::com::{take_pwstr, ComApartment};
use crate::wasapi_loopback::WasapiLoopbackCapture;

/// `DeviceDirectory` backed by the system's active audio endpoints.
///
/// Stateless: every call joins COM on the calling thread and creates its own
/// enumerator, so it can be used from any request thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiDirectory;

impl WasapiDirectory {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceDirectory for WasapiDirectory {
    fn list_endpoints(&self) -> Result<EndpointListing, StreamError> {
        let _com = ComApartment::enter()?;
        let enumerator = DeviceEnumerator::new()?;

        Ok(EndpointListing {
            render_devices: enumerator.list_devices(eRender)?,
            capture_devices: enumerator.list_devices(eCapture)?,
            error: None,
        })
    }

    fn resolve(&self, device_id: &str) -> Result<CaptureDeviceRef, StreamError> {
        let _com = ComApartment::enter()?;
        let enumerator = DeviceEnumerator::new()?;
        enumerator.resolve(device_id)
    }
}

/// Audio device enumerator using the Windows MMDevice API.
///
/// Requires COM to be initialized on the calling thread.
pub(crate) struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub(crate) fn new() -> Result<Self, StreamError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| StreamError::PrimitiveFailure(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// Open an endpoint by ID, whatever its direction or state.
    pub(crate) fn device(&self, device_id: &str) -> Result<IMMDevice, StreamError> {
        let wide_id: Vec<u16> = device_id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR(wide_id.as_ptr()))
                .map_err(|_| StreamError::DeviceNotFound(device_id.to_string()))
        }
    }

    /// Resolve `device_id` against every active endpoint, render or capture.
    fn resolve(&self, device_id: &str) -> Result<CaptureDeviceRef, StreamError> {
        let device = self.find_active(device_id)?;

        let flow = endpoint_flow(&device)?;
        let name = get_device_friendly_name(&device).unwrap_or_else(|| device_id.to_string());
        let format = native_format(&device)?;

        Ok(CaptureDeviceRef::new(
            device_id,
            name,
            format,
            Box::new(WasapiLoopbackCapture::new(device_id.to_string(), flow)),
        ))
    }

    fn find_active(&self, device_id: &str) -> Result<IMMDevice, StreamError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eAll, DEVICE_STATE_ACTIVE)
                .map_err(|e| StreamError::PrimitiveFailure(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| StreamError::PrimitiveFailure(format!("GetCount failed: {}", e)))?;

            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Ok(id) = device.GetId() else {
                    continue;
                };
                if take_pwstr(id) == device_id {
                    return Ok(device);
                }
            }
        }

        Err(StreamError::DeviceNotFound(device_id.to_string()))
    }

    fn list_devices(&self, data_flow: EDataFlow) -> Result<Vec<EndpointInfo>, StreamError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow, DEVICE_STATE_ACTIVE)
                .map_err(|e| StreamError::PrimitiveFailure(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| StreamError::PrimitiveFailure(format!("GetCount failed: {}", e)))?;

            // Get default device ID for comparison
            let default_id = self
                .enumerator
                .GetDefaultAudioEndpoint(data_flow, eConsole)
                .ok()
                .and_then(|d| d.GetId().ok())
                .map(|id| take_pwstr(id));

            let mut devices = Vec::new();

            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(_) => continue,
                };

                let id = match device.GetId() {
                    Ok(id) => take_pwstr(id),
                    Err(_) => continue,
                };

                let name = get_device_friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());

                devices.push(EndpointInfo {
                    index: i as usize,
                    name,
                    id,
                    state: EndpointState::Active,
                    is_default,
                });
            }

            Ok(devices)
        }
    }
}

fn endpoint_flow(device: &IMMDevice) -> Result<EndpointFlow, StreamError> {
    unsafe {
        let endpoint: IMMEndpoint = device
            .cast()
            .map_err(|e| StreamError::PrimitiveFailure(format!("IMMEndpoint cast failed: {}", e)))?;
        let flow = endpoint
            .GetDataFlow()
            .map_err(|e| StreamError::PrimitiveFailure(format!("GetDataFlow failed: {}", e)))?;

        Ok(if flow == eCapture {
            EndpointFlow::Capture
        } else {
            EndpointFlow::Render
        })
    }
}

/// The shared-mode mix format the endpoint will deliver.
fn native_format(device: &IMMDevice) -> Result<WaveFormat, StreamError> {
    unsafe {
        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| StreamError::PrimitiveFailure(format!("Activate failed: {}", e)))?;

        let mix_format = MixFormat::query(&audio_client)?;
        Ok(mix_format.wave_format())
    }
}

/// Owned `WAVEFORMATEX` returned by `GetMixFormat`, freed on drop.
pub(crate) struct MixFormat(*mut WAVEFORMATEX);

impl MixFormat {
    pub(crate) unsafe fn query(audio_client: &IAudioClient) -> Result<Self, StreamError> {
        let ptr = audio_client
            .GetMixFormat()
            .map_err(|e| StreamError::PrimitiveFailure(format!("GetMixFormat failed: {}", e)))?;
        Ok(Self(ptr))
    }

    pub(crate) fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    pub(crate) fn wave_format(&self) -> WaveFormat {
        // WAVEFORMATEX is packed: copy it out before reading fields.
        let raw: WAVEFORMATEX = unsafe { *self.0 };
        let tag = raw.wFormatTag;
        let sample_rate = raw.nSamplesPerSec;
        let bits_per_sample = raw.wBitsPerSample;
        let channels = raw.nChannels;

        WaveFormat {
            sample_rate,
            bits_per_sample,
            channels,
            encoding: SampleEncoding::from_format_tag(tag),
        }
    }

    pub(crate) fn block_align(&self) -> usize {
        let raw: WAVEFORMATEX = unsafe { *self.0 };
        let block_align = raw.nBlockAlign;
        block_align as usize
    }
}

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe {
            CoTaskMemFree(Some(self.0 as *const _));
        }
    }
}

/// Read the PKEY_Device_FriendlyName property from a device.
fn get_device_friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;

        let mut prop_variant = store.GetValue(&PKEY_Device_FriendlyName).ok()?;

        let name = if prop_variant.Anonymous.Anonymous.vt == VT_LPWSTR {
            let pwsz = prop_variant.Anonymous.Anonymous.Anonymous.pwszVal;
            if !pwsz.is_null() {
                pwsz.to_string().ok()
            } else {
                None
            }
        } else {
            None
        };

        PropVariantClear(&mut prop_variant).ok();
        name
    }
}
