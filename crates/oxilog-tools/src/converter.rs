//! # 浓度换算（Concentration Converter）
//!
//! 气体分析仪输出经分压网络衰减后进入 ADC：
//!
//! | 传感器 | 原始输出 | 衰减 | 标定 |
//! |--------|----------|------|------|
//! | O2 | 0~10 V = 0~100 % | 0.5 × 0.673 | 10 %/V |
//! | CO2 | 0~7.5 V = 0~15 % | 0.5 × 0.88 | 2 %/V |
//!
//! 换算为纯函数：ADC 码先钳位到 `[0, max_code]`，结果再钳位到物理范围。

use oxilog_protocol::SubSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// O2 物理范围（%）
pub const O2_RANGE: (f64, f64) = (0.0, 100.0);

/// CO2 物理范围（%）
pub const CO2_RANGE: (f64, f64) = (0.0, 15.0);

/// O2 分压网络衰减比
pub const O2_ATTENUATION: f64 = 0.5 * 0.673;

/// CO2 分压网络衰减比
pub const CO2_ATTENUATION: f64 = 0.5 * 0.88;

/// 传感器原始标定（%/V，衰减前）
const O2_PCT_PER_VOLT: f64 = 10.0;
const CO2_PCT_PER_VOLT: f64 = 2.0;

/// 校准参数错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Calibration field {field} is not finite: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("ADC reference voltage must be positive, got {0}")]
    InvalidVref(f64),

    #[error("ADC resolution must be within 1..=24 bits, got {0}")]
    InvalidBits(u32),

    #[error("Scale {field} must not be negative, got {value}")]
    NegativeScale { field: &'static str, value: f64 },
}

/// 换算校准参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasCalibration {
    /// ADC 参考电压（V）
    pub adc_vref: f64,
    /// ADC 位数
    pub adc_bits: u32,
    /// O2 换算系数（%/V，ADC 输入端）
    pub o2_scale: f64,
    /// O2 零点偏移（%）
    pub o2_offset: f64,
    /// CO2 换算系数（%/V，ADC 输入端）
    pub co2_scale: f64,
    /// CO2 零点偏移（%）
    pub co2_offset: f64,
}

impl Default for GasCalibration {
    fn default() -> Self {
        Self::from_attenuation(O2_ATTENUATION, CO2_ATTENUATION)
    }
}

impl GasCalibration {
    /// 按分压网络衰减比计算换算系数
    pub fn from_attenuation(o2_attenuation: f64, co2_attenuation: f64) -> Self {
        Self {
            adc_vref: 3.3,
            adc_bits: 12,
            o2_scale: O2_PCT_PER_VOLT / o2_attenuation,
            o2_offset: 0.0,
            co2_scale: CO2_PCT_PER_VOLT / co2_attenuation,
            co2_offset: 0.0,
        }
    }

    /// ADC 最大码值（12 位为 4095）
    pub fn max_code(&self) -> i64 {
        (1i64 << self.adc_bits.min(24)) - 1
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let fields = [
            ("adc_vref", self.adc_vref),
            ("o2_scale", self.o2_scale),
            ("o2_offset", self.o2_offset),
            ("co2_scale", self.co2_scale),
            ("co2_offset", self.co2_offset),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(CalibrationError::NonFinite { field, value });
            }
        }

        if self.adc_vref <= 0.0 {
            return Err(CalibrationError::InvalidVref(self.adc_vref));
        }
        if !(1..=24).contains(&self.adc_bits) {
            return Err(CalibrationError::InvalidBits(self.adc_bits));
        }
        if self.o2_scale < 0.0 {
            return Err(CalibrationError::NegativeScale {
                field: "o2_scale",
                value: self.o2_scale,
            });
        }
        if self.co2_scale < 0.0 {
            return Err(CalibrationError::NegativeScale {
                field: "co2_scale",
                value: self.co2_scale,
            });
        }
        Ok(())
    }
}

/// 气体浓度读数
///
/// 与 [`SubSample`] 一一对应，百分比始终在物理范围内。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasReading {
    /// 来源样本的时间戳（微秒）
    pub timestamp_us: u64,
    /// O2 浓度（%，0~100）
    pub o2_pct: f64,
    /// CO2 浓度（%，0~15）
    pub co2_pct: f64,
}

/// 浓度换算器
#[derive(Debug, Clone)]
pub struct ConcentrationConverter {
    calibration: GasCalibration,
    max_code: i64,
}

impl ConcentrationConverter {
    pub fn new(calibration: GasCalibration) -> Result<Self, CalibrationError> {
        calibration.validate()?;
        Ok(Self {
            max_code: calibration.max_code(),
            calibration,
        })
    }

    pub fn calibration(&self) -> &GasCalibration {
        &self.calibration
    }

    /// ADC 码 → ADC 输入端电压（越界码先钳位）
    pub fn adc_to_voltage(&self, code: i32) -> f64 {
        let clamped = (code as i64).clamp(0, self.max_code);
        clamped as f64 / self.max_code as f64 * self.calibration.adc_vref
    }

    pub fn o2_pct(&self, code: i32) -> f64 {
        let pct = self.adc_to_voltage(code) * self.calibration.o2_scale + self.calibration.o2_offset;
        pct.clamp(O2_RANGE.0, O2_RANGE.1)
    }

    pub fn co2_pct(&self, code: i32) -> f64 {
        let pct =
            self.adc_to_voltage(code) * self.calibration.co2_scale + self.calibration.co2_offset;
        pct.clamp(CO2_RANGE.0, CO2_RANGE.1)
    }

    pub fn convert(&self, sample: &SubSample) -> GasReading {
        GasReading {
            timestamp_us: sample.timestamp_us,
            o2_pct: self.o2_pct(sample.o2_adc),
            co2_pct: self.co2_pct(sample.co2_adc),
        }
    }
}

impl Default for ConcentrationConverter {
    fn default() -> Self {
        let calibration = GasCalibration::default();
        Self {
            max_code: calibration.max_code(),
            calibration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn one_decimal(value: f64) -> String {
        format!("{:.1}", value)
    }

    #[test]
    fn test_fixture_pairs() {
        let converter = ConcentrationConverter::default();
        let reading = converter.convert(&SubSample {
            timestamp_us: 5,
            o2_adc: 877,
            co2_adc: 1229,
        });
        assert_eq!(reading.timestamp_us, 5);
        assert_eq!(one_decimal(reading.o2_pct), "21.0");
        assert_eq!(one_decimal(reading.co2_pct), "4.5");
    }

    #[test]
    fn test_default_scales() {
        let cal = GasCalibration::default();
        assert!((cal.o2_scale - 10.0 / 0.3365).abs() < 1e-9);
        assert!((cal.co2_scale - 2.0 / 0.44).abs() < 1e-9);
        assert_eq!(cal.max_code(), 4095);
    }

    #[test]
    fn test_out_of_range_codes_clamped() {
        let converter = ConcentrationConverter::default();
        assert_eq!(converter.adc_to_voltage(-50), 0.0);
        assert!((converter.adc_to_voltage(10_000) - 3.3).abs() < 1e-12);
        assert_eq!(converter.o2_pct(-1), 0.0);
        // 满量程 3.3 V 对应 CO2 约 15 %，钳位后不超过 15
        assert!(converter.co2_pct(i16::MAX as i32) <= 15.0);
    }

    #[test]
    fn test_offset_cannot_escape_range() {
        let converter = ConcentrationConverter::new(GasCalibration {
            o2_offset: 250.0,
            co2_offset: -20.0,
            ..GasCalibration::default()
        })
        .unwrap();
        assert_eq!(converter.o2_pct(100), 100.0);
        assert_eq!(converter.co2_pct(4095), 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_calibration() {
        let bad_bits = GasCalibration {
            adc_bits: 0,
            ..GasCalibration::default()
        };
        assert_eq!(bad_bits.validate(), Err(CalibrationError::InvalidBits(0)));

        let bad_vref = GasCalibration {
            adc_vref: 0.0,
            ..GasCalibration::default()
        };
        assert!(matches!(
            ConcentrationConverter::new(bad_vref),
            Err(CalibrationError::InvalidVref(_))
        ));

        let infinite = GasCalibration::from_attenuation(0.0, 0.44);
        assert!(matches!(
            infinite.validate(),
            Err(CalibrationError::NonFinite {
                field: "o2_scale",
                ..
            })
        ));

        let negative = GasCalibration {
            co2_scale: -1.0,
            ..GasCalibration::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(CalibrationError::NegativeScale { .. })
        ));
    }

    #[test]
    fn test_calibration_from_partial_toml() {
        let cal: GasCalibration = toml::from_str("o2_offset = 0.5\nadc_bits = 10").unwrap();
        assert_eq!(cal.adc_bits, 10);
        assert_eq!(cal.o2_offset, 0.5);
        assert_eq!(cal.adc_vref, 3.3);
    }

    proptest! {
        #[test]
        fn output_always_in_range(o2 in any::<i16>(), co2 in any::<i16>()) {
            let converter = ConcentrationConverter::default();
            let o2_pct = converter.o2_pct(o2 as i32);
            let co2_pct = converter.co2_pct(co2 as i32);
            prop_assert!((0.0..=100.0).contains(&o2_pct));
            prop_assert!((0.0..=15.0).contains(&co2_pct));
        }

        #[test]
        fn output_monotonic(a in 0i32..4096, b in 0i32..4096) {
            let converter = ConcentrationConverter::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(converter.o2_pct(lo) <= converter.o2_pct(hi));
            prop_assert!(converter.co2_pct(lo) <= converter.co2_pct(hi));
        }
    }
}
