//! Tray configuration.

use std::collections::BTreeMap;

/// Configuration flags for a [`Tray`](super::Tray).
///
/// All flags default to `false`: a conventional tray with one liquid and one
/// vapor inlet, no side draws, no heat duty and no pressure drop.
///
/// # Examples
///
/// ```
/// use stagewise::models::TrayConfig;
///
/// let config = TrayConfig::new()
///     .feed_tray()
///     .with_vapor_side_draw()
///     .with_package_arg("temperature_ref", 273.15);
///
/// assert!(config.is_feed_tray);
/// assert!(!config.has_liquid_side_draw);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrayConfig {
    /// Adds a `feed` inlet
    pub is_feed_tray: bool,
    /// Adds a `liq_side_draw` outlet and the `liq_side_sf` split fraction
    pub has_liquid_side_draw: bool,
    /// Adds a `vap_side_draw` outlet and the `vap_side_sf` split fraction
    pub has_vapor_side_draw: bool,
    /// Adds a `heat_duty` term to the energy balance
    pub has_heat_transfer: bool,
    /// Adds a `deltaP` term to the pressure balance
    pub has_pressure_change: bool,
    /// Extra arguments forwarded to every property state
    pub property_package_args: BTreeMap<String, f64>,
}

impl TrayConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the tray as a feed tray.
    pub fn feed_tray(mut self) -> Self {
        self.is_feed_tray = true;
        self
    }

    /// Enables the liquid side draw.
    pub fn with_liquid_side_draw(mut self) -> Self {
        self.has_liquid_side_draw = true;
        self
    }

    /// Enables the vapor side draw.
    pub fn with_vapor_side_draw(mut self) -> Self {
        self.has_vapor_side_draw = true;
        self
    }

    /// Enables the heat duty.
    pub fn with_heat_transfer(mut self) -> Self {
        self.has_heat_transfer = true;
        self
    }

    /// Enables the pressure drop.
    pub fn with_pressure_change(mut self) -> Self {
        self.has_pressure_change = true;
        self
    }

    /// Adds an extra property package argument.
    pub fn with_package_arg(mut self, name: &str, value: f64) -> Self {
        self.property_package_args.insert(name.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrayConfig::default();
        assert!(!config.is_feed_tray);
        assert!(!config.has_liquid_side_draw);
        assert!(!config.has_vapor_side_draw);
        assert!(!config.has_heat_transfer);
        assert!(!config.has_pressure_change);
        assert!(config.property_package_args.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = TrayConfig::new().with_heat_transfer().with_pressure_change();
        assert!(config.has_heat_transfer && config.has_pressure_change);
        assert!(!config.is_feed_tray);
    }
}
