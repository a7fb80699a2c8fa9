//! Table-driven sensor attribute accessor
//!
//! A static table maps symbolic keys to typed getter/setter pairs on the
//! [`SensorDriver`] trait, replacing the upstream driver's
//! function-pointer-at-offset dispatch with something the compiler can
//! check. Two keys live outside the generic table: `xclk` (absolute
//! clock frequency, accepted in Hz or MHz) and `framerate` (a derived
//! value realized through the sensor's HTS/VTS timing registers).
//!
//! `load` applies a flat JSON document in key order and stops at the
//! first failure. Entries applied before the failing one remain applied:
//! there is no rollback, matching the upstream behavior.

use crate::error::{ControlError, DeviceError};
use serde_json::Value;
use std::path::Path;

/// Sensor timing registers used by the framerate computation.
const REG_HTS: u16 = 0x380C;
const REG_VTS: u16 = 0x380E;

/// Frame geometry per framesize index, smallest to largest.
pub const FRAMESIZES: &[(u16, u16)] = &[
    (96, 96),
    (160, 120),
    (176, 144),
    (240, 176),
    (240, 240),
    (320, 240),
    (400, 296),
    (480, 320),
    (640, 480),
    (800, 600),
    (1024, 768),
    (1280, 720),
    (1280, 1024),
    (1600, 1200),
    (1920, 1080),
    (2048, 1536),
    (2560, 1440),
    (2560, 1920),
];

/// Cached sensor state mirrored after each successful setter call.
///
/// `gainceiling` is stored signed but must be read unsigned: the
/// upstream driver declares it one byte narrower than the hardware
/// field. Preserved for compatibility rather than corrected.
#[derive(Debug, Clone, Default)]
pub struct SensorStatus {
    pub pixformat: u8,
    pub framesize: u8,
    pub contrast: i8,
    pub brightness: i8,
    pub saturation: i8,
    pub sharpness: i8,
    pub denoise: u8,
    pub gainceiling: i8,
    pub quality: u8,
    pub colorbar: u8,
    pub awb: u8,
    pub agc: u8,
    pub aec: u8,
    pub hmirror: u8,
    pub vflip: u8,
    pub aec2: u8,
    pub awb_gain: u8,
    pub agc_gain: u8,
    pub aec_value: u16,
    pub special_effect: u8,
    pub wb_mode: u8,
    pub ae_level: i8,
    pub dcw: u8,
    pub bpc: u8,
    pub wpc: u8,
    pub raw_gma: u8,
    pub lenc: u8,
}

/// One sensor family's control surface.
pub trait SensorDriver: Send {
    fn status(&self) -> &SensorStatus;
    fn xclk_hz(&self) -> u32;
    fn set_xclk_hz(&mut self, hz: u32) -> Result<(), DeviceError>;
    fn get_reg(&mut self, addr: u16, mask: u16) -> Result<u16, DeviceError>;
    fn set_reg(&mut self, addr: u16, value: u16, mask: u16) -> Result<(), DeviceError>;
    /// Active frame geometry for the current framesize.
    fn frame_size(&self) -> (u16, u16);

    fn set_pixformat(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_framesize(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_contrast(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_brightness(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_saturation(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_sharpness(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_denoise(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_gainceiling(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_quality(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_colorbar(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_whitebal(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_gain_ctrl(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_exposure_ctrl(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_hmirror(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_vflip(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_aec2(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_awb_gain(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_agc_gain(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_aec_value(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_special_effect(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_wb_mode(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_ae_level(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_dcw(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_bpc(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_wpc(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_raw_gma(&mut self, value: i32) -> Result<(), DeviceError>;
    fn set_lenc(&mut self, value: i32) -> Result<(), DeviceError>;
}

struct Attr {
    key: &'static str,
    get: fn(&SensorStatus) -> i32,
    set: fn(&mut dyn SensorDriver, i32) -> Result<(), DeviceError>,
}

macro_rules! attrs {
    ($( $key:ident => $setter:ident ),+ $(,)?) => {
        &[ $( Attr {
            key: stringify!($key),
            get: |s| s.$key as i32,
            set: |d, v| d.$setter(v),
        } ),+ ]
    };
}

static ATTRS: &[Attr] = attrs![
    pixformat => set_pixformat,
    framesize => set_framesize,
    contrast => set_contrast,
    brightness => set_brightness,
    saturation => set_saturation,
    sharpness => set_sharpness,
    denoise => set_denoise,
    gainceiling => set_gainceiling,
    quality => set_quality,
    colorbar => set_colorbar,
    awb => set_whitebal,
    agc => set_gain_ctrl,
    aec => set_exposure_ctrl,
    hmirror => set_hmirror,
    vflip => set_vflip,
    aec2 => set_aec2,
    awb_gain => set_awb_gain,
    agc_gain => set_agc_gain,
    aec_value => set_aec_value,
    special_effect => set_special_effect,
    wb_mode => set_wb_mode,
    ae_level => set_ae_level,
    dcw => set_dcw,
    bpc => set_bpc,
    wpc => set_wpc,
    raw_gma => set_raw_gma,
    lenc => set_lenc,
];

fn find(key: &str) -> Result<&'static Attr, DeviceError> {
    ATTRS
        .iter()
        .find(|a| a.key == key)
        .ok_or_else(|| DeviceError::UnknownAttribute(key.to_string()))
}

/// Read one attribute from the driver's cached status.
pub fn get(driver: &dyn SensorDriver, key: &str) -> Result<i32, DeviceError> {
    // Upstream quirk: gainceiling is a 10-bit hardware field squeezed
    // into a signed byte; reading it signed would flip high values.
    if key == "gainceiling" {
        return Ok(driver.status().gainceiling as u8 as i32);
    }
    let attr = find(key)?;
    Ok((attr.get)(driver.status()))
}

/// Set one attribute, skipping the driver call when unchanged.
pub fn set(driver: &mut dyn SensorDriver, key: &str, value: i32) -> Result<(), DeviceError> {
    let attr = find(key)?;
    if get(driver, key)? == value {
        return Ok(());
    }
    (attr.set)(driver, value)
}

/// Instantaneous frame rate computed from the timing registers.
pub fn framerate(driver: &mut dyn SensorDriver) -> Result<f32, DeviceError> {
    let hts = driver.get_reg(REG_HTS, 0xFFFF)? as f32;
    let vts = driver.get_reg(REG_VTS, 0xFFFF)? as f32;
    // Pixel clock runs at 1.25x the external clock on this family.
    let clk = 1.25 * driver.xclk_hz() as f32;
    Ok(clk / hts / vts)
}

/// Retarget the frame rate by recomputing the VTS timing register.
/// A target of 0 leaves the current timing untouched.
pub fn set_framerate(driver: &mut dyn SensorDriver, fps: i32) -> Result<(), DeviceError> {
    if fps <= 0 {
        return Ok(());
    }
    let hts = driver.get_reg(REG_HTS, 0xFFFF)? as f32;
    let vts = driver.get_reg(REG_VTS, 0xFFFF)?;
    let clk = 1.25 * driver.xclk_hz() as f32;
    let (_, height) = driver.frame_size();
    let target = (clk / hts / fps as f32) as u16;
    let target = target.clamp(height, 0xFFFF);
    if target == vts {
        return Ok(());
    }
    driver.set_reg(REG_VTS, target, 0xFFFF)
}

fn numeric_value(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as i32),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

/// Apply a flat JSON settings document in key order.
///
/// Stops at the first failing entry; entries already applied stay
/// applied (partial apply, no rollback).
pub fn load(driver: &mut dyn SensorDriver, json: &str) -> Result<(), ControlError> {
    let doc: Value = serde_json::from_str(json)
        .map_err(|e| ControlError::InvalidArgument(format!("Bad sensor JSON: {}", e)))?;
    let Value::Object(map) = doc else {
        return Err(ControlError::InvalidArgument(
            "Sensor JSON must be a flat object".to_string(),
        ));
    };
    for (key, raw) in &map {
        let Some(value) = numeric_value(raw) else {
            return Err(ControlError::InvalidArgument(format!(
                "Non-numeric value for '{}': {}",
                key, raw
            )));
        };
        let applied = match key.as_str() {
            "xclk" => {
                if value == 0 {
                    continue;
                }
                // Values above 240 are taken as Hz, below as MHz.
                let hz = if value > 240 {
                    value as u32
                } else {
                    value as u32 * 1_000_000
                };
                driver.set_xclk_hz(hz)
            }
            "framerate" => set_framerate(driver, value),
            _ => set(driver, key, value),
        };
        applied.map_err(|e| ControlError::InvalidArgument(format!("'{}': {}", key, e)))?;
        tracing::debug!("Sensor {} = {}", key, value);
    }
    Ok(())
}

/// Dump the whole table plus derived read-only fields as JSON.
pub fn dump_json(driver: &mut dyn SensorDriver) -> Value {
    let mut map = serde_json::Map::new();
    let (width, height) = driver.frame_size();
    let fps = framerate(driver).unwrap_or(0.0);
    map.insert("framerate".into(), fps.into());
    map.insert("width".into(), width.into());
    map.insert("height".into(), height.into());
    map.insert("xclk".into(), driver.xclk_hz().into());
    for attr in ATTRS {
        let value = get(driver, attr.key).unwrap_or(0);
        map.insert(attr.key.into(), value.into());
    }
    let sizes: Vec<Value> = FRAMESIZES
        .iter()
        .map(|&(w, h)| Value::Array(vec![w.into(), h.into()]))
        .collect();
    map.insert("framesizes".into(), Value::Array(sizes));
    Value::Object(map)
}

/// Dump as aligned `key: value` text for the console.
pub fn dump_text(driver: &mut dyn SensorDriver) -> String {
    let klen = ATTRS
        .iter()
        .map(|a| a.key.len())
        .chain(["framerate".len()].into_iter())
        .max()
        .unwrap_or(0);
    let (width, height) = driver.frame_size();
    let mut out = String::new();
    out.push_str(&format!(
        "{:>klen$}: {:.3}\n",
        "framerate",
        framerate(driver).unwrap_or(0.0)
    ));
    out.push_str(&format!("{:>klen$}: {}\n", "width", width));
    out.push_str(&format!("{:>klen$}: {}\n", "height", height));
    out.push_str(&format!("{:>klen$}: {}\n", "xclk", driver.xclk_hz()));
    for attr in ATTRS {
        let value = get(driver, attr.key).unwrap_or(0);
        out.push_str(&format!("{:>klen$}: {}\n", attr.key, value));
    }
    out
}

/// Persist the applied settings (table keys plus xclk) to a file.
pub fn save_to_file(driver: &mut dyn SensorDriver, path: &Path) -> std::io::Result<()> {
    let mut map = serde_json::Map::new();
    map.insert("xclk".into(), driver.xclk_hz().into());
    for attr in ATTRS {
        map.insert(attr.key.into(), get(driver, attr.key).unwrap_or(0).into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(map))?)
}

/// Restore previously persisted settings. Missing files are fine.
pub fn load_from_file(driver: &mut dyn SensorDriver, path: &Path) -> Result<(), ControlError> {
    if !path.exists() {
        return Ok(());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ControlError::InvalidArgument(format!("Failed to read {:?}: {}", path, e)))?;
    load(driver, &contents)
}

/// Simulated OV-family sensor used by the synthetic video source and in
/// hardware-less deployments.
pub struct SimSensor {
    status: SensorStatus,
    xclk_hz: u32,
    hts: u16,
    vts: u16,
}

impl Default for SimSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSensor {
    pub fn new() -> Self {
        Self {
            status: SensorStatus {
                framesize: 9, // 800x600
                quality: 20,
                ..SensorStatus::default()
            },
            xclk_hz: 20_000_000,
            // UXGA-derived line/frame timing defaults
            hts: 1896,
            vts: 984,
        }
    }

    fn store_flag(slot: &mut u8, value: i32) -> Result<(), DeviceError> {
        *slot = (value != 0) as u8;
        Ok(())
    }

    fn store_level(slot: &mut i8, attr: &'static str, value: i32) -> Result<(), DeviceError> {
        if !(-2..=2).contains(&value) {
            return Err(DeviceError::Read(format!(
                "{} level {} out of range -2..=2",
                attr, value
            )));
        }
        *slot = value as i8;
        Ok(())
    }
}

impl SensorDriver for SimSensor {
    fn status(&self) -> &SensorStatus {
        &self.status
    }

    fn xclk_hz(&self) -> u32 {
        self.xclk_hz
    }

    fn set_xclk_hz(&mut self, hz: u32) -> Result<(), DeviceError> {
        if hz == 0 || hz > 40_000_000 {
            return Err(DeviceError::Read(format!("xclk {} Hz unsupported", hz)));
        }
        self.xclk_hz = hz;
        Ok(())
    }

    fn get_reg(&mut self, addr: u16, mask: u16) -> Result<u16, DeviceError> {
        match addr {
            REG_HTS => Ok(self.hts & mask),
            REG_VTS => Ok(self.vts & mask),
            _ => Err(DeviceError::Register(addr)),
        }
    }

    fn set_reg(&mut self, addr: u16, value: u16, mask: u16) -> Result<(), DeviceError> {
        match addr {
            REG_HTS => self.hts = (self.hts & !mask) | (value & mask),
            REG_VTS => self.vts = (self.vts & !mask) | (value & mask),
            _ => return Err(DeviceError::Register(addr)),
        }
        Ok(())
    }

    fn frame_size(&self) -> (u16, u16) {
        FRAMESIZES
            .get(self.status.framesize as usize)
            .copied()
            .unwrap_or(FRAMESIZES[0])
    }

    fn set_pixformat(&mut self, value: i32) -> Result<(), DeviceError> {
        self.status.pixformat = value as u8;
        Ok(())
    }

    fn set_framesize(&mut self, value: i32) -> Result<(), DeviceError> {
        if !(0..FRAMESIZES.len() as i32).contains(&value) {
            return Err(DeviceError::Read(format!("framesize {} out of range", value)));
        }
        self.status.framesize = value as u8;
        Ok(())
    }

    fn set_contrast(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_level(&mut self.status.contrast, "contrast", value)
    }

    fn set_brightness(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_level(&mut self.status.brightness, "brightness", value)
    }

    fn set_saturation(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_level(&mut self.status.saturation, "saturation", value)
    }

    fn set_sharpness(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_level(&mut self.status.sharpness, "sharpness", value)
    }

    fn set_denoise(&mut self, value: i32) -> Result<(), DeviceError> {
        self.status.denoise = value as u8;
        Ok(())
    }

    fn set_gainceiling(&mut self, value: i32) -> Result<(), DeviceError> {
        if !(0..=255).contains(&value) {
            return Err(DeviceError::Read(format!("gainceiling {} out of range", value)));
        }
        self.status.gainceiling = value as u8 as i8;
        Ok(())
    }

    fn set_quality(&mut self, value: i32) -> Result<(), DeviceError> {
        if !(1..=63).contains(&value) {
            return Err(DeviceError::Read(format!("quality {} out of range", value)));
        }
        self.status.quality = value as u8;
        Ok(())
    }

    fn set_colorbar(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.colorbar, value)
    }

    fn set_whitebal(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.awb, value)
    }

    fn set_gain_ctrl(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.agc, value)
    }

    fn set_exposure_ctrl(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.aec, value)
    }

    fn set_hmirror(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.hmirror, value)
    }

    fn set_vflip(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.vflip, value)
    }

    fn set_aec2(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.aec2, value)
    }

    fn set_awb_gain(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.awb_gain, value)
    }

    fn set_agc_gain(&mut self, value: i32) -> Result<(), DeviceError> {
        self.status.agc_gain = value as u8;
        Ok(())
    }

    fn set_aec_value(&mut self, value: i32) -> Result<(), DeviceError> {
        self.status.aec_value = value as u16;
        Ok(())
    }

    fn set_special_effect(&mut self, value: i32) -> Result<(), DeviceError> {
        self.status.special_effect = value as u8;
        Ok(())
    }

    fn set_wb_mode(&mut self, value: i32) -> Result<(), DeviceError> {
        self.status.wb_mode = value as u8;
        Ok(())
    }

    fn set_ae_level(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_level(&mut self.status.ae_level, "ae_level", value)
    }

    fn set_dcw(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.dcw, value)
    }

    fn set_bpc(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.bpc, value)
    }

    fn set_wpc(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.wpc, value)
    }

    fn set_raw_gma(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.raw_gma, value)
    }

    fn set_lenc(&mut self, value: i32) -> Result<(), DeviceError> {
        Self::store_flag(&mut self.status.lenc, value)
    }
}
