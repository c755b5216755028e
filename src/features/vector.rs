//! Fixed, ordered feature layout shared by the engineer and the models.

use serde::Serialize;

// ---

macro_rules! feature_layout {
    ($($variant:ident => $name:literal,)+) => {
        /// One named slot of the feature vector. Discriminants are vector indices.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Feature {
            $($variant,)+
        }

        impl Feature {
            pub const ALL: &'static [Feature] = &[$(Feature::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Feature::$variant => $name,)+
                }
            }

            pub fn from_name(name: &str) -> Option<Feature> {
                match name {
                    $($name => Some(Feature::$variant),)+
                    _ => None,
                }
            }

            pub fn index(self) -> usize {
                self as usize
            }
        }
    };
}

feature_layout! {
    // Instantaneous measurements and site attributes
    Temperature => "temperature",
    Humidity => "humidity",
    SensorAgeDays => "sensor_age_days",
    Latitude => "latitude",
    Longitude => "longitude",
    Elevation => "elevation",
    CanopyFraction => "canopy_fraction",
    HourOfDay => "hour_of_day",
    // Calendar
    DayOfMonth => "day_of_month",
    Month => "month",
    HourSin => "hour_sin",
    HourCos => "hour_cos",
    MonthSin => "month_sin",
    MonthCos => "month_cos",
    // Reanalysis covariates
    SensibleHeatFlux => "sensible_heat_flux",
    SolarRadiationDown => "solar_radiation_down",
    ThermalRadiationDown => "thermal_radiation_down",
    Precipitation => "precipitation",
    WindU => "wind_u",
    WindV => "wind_v",
    // Derived meteorology
    WindSpeed => "wind_speed",
    WindDirection => "wind_direction",
    Dewpoint => "dewpoint",
    DewpointDepression => "dewpoint_depression",
    VaporPressureDeficit => "vapor_pressure_deficit",
    DiurnalRadiation => "diurnal_radiation",
    PolarDayNight => "polar_day_night",
    // Polynomial and interaction terms
    TemperatureSquared => "temperature_squared",
    HumiditySquared => "humidity_squared",
    TemperatureXHumidity => "temperature_x_humidity",
    TemperatureXAge => "temperature_x_age",
    // Lags
    TemperatureLag1h => "temperature_lag_1h",
    TemperatureLag2h => "temperature_lag_2h",
    TemperatureLag3h => "temperature_lag_3h",
    TemperatureLag4h => "temperature_lag_4h",
    TemperatureLag5h => "temperature_lag_5h",
    TemperatureLag6h => "temperature_lag_6h",
    HumidityLag1h => "humidity_lag_1h",
    HumidityLag2h => "humidity_lag_2h",
    HumidityLag3h => "humidity_lag_3h",
    SolarRadiationLag1h => "solar_radiation_lag_1h",
    SolarRadiationLag2h => "solar_radiation_lag_2h",
    // Rolling statistics
    TemperatureMean3h => "temperature_mean_3h",
    TemperatureMean6h => "temperature_mean_6h",
    TemperatureMean12h => "temperature_mean_12h",
    TemperatureStd3h => "temperature_std_3h",
    TemperatureStd6h => "temperature_std_6h",
    TemperatureStd12h => "temperature_std_12h",
    TemperatureRange3h => "temperature_range_3h",
    TemperatureRange6h => "temperature_range_6h",
    TemperatureRange12h => "temperature_range_12h",
    TemperatureTrend3h => "temperature_trend_3h",
    TemperatureTrend6h => "temperature_trend_6h",
    TemperatureTrend12h => "temperature_trend_12h",
    // Change indicators
    TemperatureChange1h => "temperature_change_1h",
    TemperatureChange2h => "temperature_change_2h",
    TemperatureChange3h => "temperature_change_3h",
    TemperatureAcceleration => "temperature_acceleration",
    // Cumulative radiation
    SolarRadiationSum3h => "solar_radiation_sum_3h",
    SolarRadiationSum6h => "solar_radiation_sum_6h",
    SolarRadiationChange1h => "solar_radiation_change_1h",
    // Thermal persistence
    HotStreakHours => "hot_streak_hours",
    ColdStreakHours => "cold_streak_hours",
    // Regime indicators
    IsHot => "is_hot",
    IsCold => "is_cold",
}

pub const FEATURE_COUNT: usize = Feature::ALL.len();

/// Engineered features for one reading. `None` marks an unavailable slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    values: Vec<Option<f64>>,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            values: vec![None; FEATURE_COUNT],
        }
    }
}

impl FeatureVector {
    /// Store a value; non-finite results are recorded as missing.
    pub fn set(&mut self, feature: Feature, value: f64) {
        self.values[feature.index()] = value.is_finite().then_some(value);
    }

    pub fn set_opt(&mut self, feature: Feature, value: Option<f64>) {
        match value {
            Some(v) => self.set(feature, v),
            None => self.values[feature.index()] = None,
        }
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values[feature.index()]
    }

    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    /// Names of slots that could not be populated, in layout order.
    pub fn missing(&self) -> Vec<&'static str> {
        Feature::ALL
            .iter()
            .filter(|f| self.values[f.index()].is_none())
            .map(|f| f.name())
            .collect()
    }
}
