//! # SpO2 估算（Severinghaus 模型）
//!
//! 由呼气末 O2/CO2 浓度估算动脉血氧饱和度：
//!
//! 1. Magnus 公式计算水蒸气压，得到干燥气体分压
//! 2. PaCO2 ≈ PetCO2，PaO2 = PetO2 − 5 mmHg（A-a 梯度）
//! 3. pH = 7.4 − 0.008 (PaCO2 − 40)
//! 4. 温度与 pH 修正后的虚拟 PO2 代入 Severinghaus 方程
//!
//! 估算值只随记录推送给展示层，不写入 CSV。

use crate::converter::GasReading;
use serde::{Deserialize, Serialize};

/// A-a 梯度（mmHg）
const A_A_GRADIENT_MMHG: f64 = 5.0;

/// PaO2 下限（mmHg），避免零或负分压
const MIN_PAO2_MMHG: f64 = 0.1;

/// hPa → mmHg
const HPA_TO_MMHG: f64 = 0.750062;

/// 环境参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentParams {
    /// 体温（°C）
    pub body_temp_c: f64,
    /// 气体传感器温度（°C）
    pub sensor_temp_c: f64,
    /// 气体传感器相对湿度（%）
    pub sensor_rh_pct: f64,
    /// 大气压（mmHg）
    pub atmospheric_mmhg: f64,
}

impl Default for EnvironmentParams {
    fn default() -> Self {
        Self {
            body_temp_c: 37.0,
            sensor_temp_c: 25.0,
            sensor_rh_pct: 60.0,
            atmospheric_mmhg: 760.0,
        }
    }
}

/// 估算结果与中间量
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spo2Estimate {
    pub spo2_pct: f64,
    pub ph: f64,
    pub pao2_mmhg: f64,
    pub paco2_mmhg: f64,
    /// 传感器处水蒸气分压
    pub ph2o_mmhg: f64,
}

/// 按环境参数估算 SpO2
pub fn estimate(env: &EnvironmentParams, o2_pct: f64, co2_pct: f64) -> Spo2Estimate {
    let rh = env.sensor_rh_pct.clamp(0.0, 100.0);
    let o2 = o2_pct.clamp(0.0, 100.0);
    let co2 = co2_pct.clamp(0.0, 100.0);
    let body_temp = env.body_temp_c.max(0.0);
    let t = env.sensor_temp_c;

    let p_sat_mmhg = 6.112 * ((17.67 * t) / (t + 243.5)).exp() * HPA_TO_MMHG;
    let ph2o = p_sat_mmhg * rh / 100.0;
    let p_dry = (env.atmospheric_mmhg - ph2o).max(0.0);

    let paco2 = p_dry * co2 / 100.0;
    let pao2 = (p_dry * o2 / 100.0 - A_A_GRADIENT_MMHG).max(MIN_PAO2_MMHG);

    let ph = 7.4 - 0.008 * (paco2 - 40.0);
    let log_shift = 0.024 * (body_temp - 37.0) + 0.48 * (7.4 - ph);
    let p = pao2 * 10f64.powf(-log_shift);

    let numerator = p.powi(3) + 150.0 * p;
    let spo2 = 100.0 * numerator / (numerator + 23400.0);

    Spo2Estimate {
        spo2_pct: spo2,
        ph,
        pao2_mmhg: pao2,
        paco2_mmhg: paco2,
        ph2o_mmhg: ph2o,
    }
}

/// 由气体读数估算（记录管线使用）
pub fn estimate_reading(env: &EnvironmentParams, reading: &GasReading) -> f64 {
    estimate(env, reading.o2_pct, reading.co2_pct).spo2_pct
}
