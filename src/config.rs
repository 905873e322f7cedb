use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Tunables for the synthetic trade generator, read from the platform
/// settings table. Every key is optional; the defaults reproduce the
/// production bands.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Band individual loss magnitudes are drawn from, in account currency.
    pub loss_amount_min: f64,
    pub loss_amount_max: f64,
    /// Band individual win magnitudes are drawn from, in account currency.
    pub win_amount_min: f64,
    pub win_amount_max: f64,
    /// Floor for the absorbing draw that lands the run on its net target.
    pub min_final_amount: f64,
    /// Fee rate applied per trade. Robot trades configure zero fees; the
    /// quantity formulas keep the fee term so a nonzero rate stays correct.
    pub fee_rate: f64,
    /// Minimum lot size a materialized quantity is floored to.
    pub min_quantity: f64,
    /// Relative price move band used for the simulated exit fallback.
    pub sim_move_min: f64,
    pub sim_move_max: f64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            loss_amount_min: 1.0,
            loss_amount_max: 10.0,
            win_amount_min: 2.0,
            win_amount_max: 15.0,
            min_final_amount: 1.0,
            fee_rate: 0.0,
            min_quantity: 0.01,
            sim_move_min: 0.005,
            sim_move_max: 0.025,
        }
    }
}

impl GeneratorSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let parsed = Self {
            loss_amount_min: setting_f64_or(
                settings,
                "ROBOT_LOSS_MIN",
                defaults.loss_amount_min,
                0.0,
            )?,
            loss_amount_max: setting_f64_or(
                settings,
                "ROBOT_LOSS_MAX",
                defaults.loss_amount_max,
                0.0,
            )?,
            win_amount_min: setting_f64_or(settings, "ROBOT_WIN_MIN", defaults.win_amount_min, 0.0)?,
            win_amount_max: setting_f64_or(settings, "ROBOT_WIN_MAX", defaults.win_amount_max, 0.0)?,
            min_final_amount: setting_f64_or(
                settings,
                "ROBOT_MIN_FINAL_AMOUNT",
                defaults.min_final_amount,
                0.0,
            )?,
            fee_rate: setting_f64_or(settings, "ROBOT_FEE_RATE", defaults.fee_rate, 0.0)?,
            min_quantity: setting_f64_or(settings, "ROBOT_MIN_QUANTITY", defaults.min_quantity, 0.0)?,
            sim_move_min: setting_f64_or(settings, "ROBOT_SIM_MOVE_MIN", defaults.sim_move_min, 0.0)?,
            sim_move_max: setting_f64_or(settings, "ROBOT_SIM_MOVE_MAX", defaults.sim_move_max, 0.0)?,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_band("ROBOT_LOSS", self.loss_amount_min, self.loss_amount_max)?;
        ensure_band("ROBOT_WIN", self.win_amount_min, self.win_amount_max)?;
        ensure_band("ROBOT_SIM_MOVE", self.sim_move_min, self.sim_move_max)?;
        if self.min_final_amount <= 0.0 {
            return Err(anyhow!(
                "ROBOT_MIN_FINAL_AMOUNT must be > 0 (value: {})",
                self.min_final_amount
            ));
        }
        if self.min_quantity <= 0.0 {
            return Err(anyhow!(
                "ROBOT_MIN_QUANTITY must be > 0 (value: {})",
                self.min_quantity
            ));
        }
        Ok(())
    }
}

fn ensure_band(prefix: &str, min: f64, max: f64) -> Result<()> {
    if max < min {
        return Err(anyhow!(
            "{}_MAX ({}) must be >= {}_MIN ({})",
            prefix,
            max,
            prefix,
            min
        ));
    }
    if min <= 0.0 {
        return Err(anyhow!("{}_MIN must be > 0 (value: {})", prefix, min));
    }
    Ok(())
}

fn setting_f64_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: f64,
) -> Result<f64> {
    let Some(raw) = settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(GeneratorSettings::default().validate().is_ok());
    }

    #[test]
    fn reads_overrides_and_rejects_inverted_bands() {
        let mut settings = HashMap::new();
        settings.insert("ROBOT_WIN_MIN".to_string(), "3.5".to_string());
        settings.insert("ROBOT_WIN_MAX".to_string(), "20".to_string());
        let parsed = GeneratorSettings::from_settings_map(&settings).unwrap();
        assert_eq!(parsed.win_amount_min, 3.5);
        assert_eq!(parsed.win_amount_max, 20.0);
        assert_eq!(parsed.loss_amount_min, 1.0);

        settings.insert("ROBOT_WIN_MAX".to_string(), "1".to_string());
        assert!(GeneratorSettings::from_settings_map(&settings).is_err());
    }

    #[test]
    fn rejects_non_numeric_setting() {
        let mut settings = HashMap::new();
        settings.insert("ROBOT_FEE_RATE".to_string(), "free".to_string());
        assert!(GeneratorSettings::from_settings_map(&settings).is_err());
    }
}
