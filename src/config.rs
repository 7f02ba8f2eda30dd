use std::time::Duration;

/// Simulation configuration
///
/// Grid cell size and view sizing must stay consistent between index
/// construction and every query made against it for one arena instance.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Ticks per second of the fixed-rate loop
    pub tps: u32,
    /// How often (in ticks) the hibernation pass runs
    pub sleep_check_interval: u32,
    /// Seconds a camera waits for its client to reconnect before teardown
    pub reconnect_grace_secs: u32,
    /// Broad-phase grid cell size in world units
    pub grid_cell_size: f32,
    /// Base view width in screen units before FOV scaling
    pub view_base_width: f32,
    /// Base view height in screen units before FOV scaling
    pub view_base_height: f32,
    /// Divisor applied to the FOV-scaled view dimensions
    pub view_scale: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tps: 25,
            sleep_check_interval: 60,
            reconnect_grace_secs: 30,
            grid_cell_size: 128.0,
            view_base_width: 1920.0,
            view_base_height: 1080.0,
            view_scale: 1.5,
        }
    }
}

impl SimulationConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(tps) = std::env::var("TPS") {
            if let Ok(parsed) = tps.parse::<u32>() {
                if parsed > 0 && parsed <= 240 {
                    config.tps = parsed;
                } else {
                    tracing::warn!("TPS must be 1-240, using default");
                }
            } else {
                tracing::warn!("Invalid TPS '{}', using default", tps);
            }
        }

        if let Ok(interval) = std::env::var("SLEEP_CHECK_INTERVAL") {
            if let Ok(parsed) = interval.parse::<u32>() {
                if parsed > 0 {
                    config.sleep_check_interval = parsed;
                } else {
                    tracing::warn!("SLEEP_CHECK_INTERVAL must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid SLEEP_CHECK_INTERVAL '{}', using default", interval);
            }
        }

        if let Ok(grace) = std::env::var("RECONNECT_GRACE_SECS") {
            if let Ok(parsed) = grace.parse::<u32>() {
                config.reconnect_grace_secs = parsed;
            } else {
                tracing::warn!("Invalid RECONNECT_GRACE_SECS '{}', using default", grace);
            }
        }

        if let Ok(cell) = std::env::var("GRID_CELL_SIZE") {
            if let Ok(parsed) = cell.parse::<f32>() {
                if parsed > 0.0 {
                    config.grid_cell_size = parsed;
                } else {
                    tracing::warn!("GRID_CELL_SIZE must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid GRID_CELL_SIZE '{}', using default", cell);
            }
        }

        Self::load_positive_f32("VIEW_BASE_WIDTH", &mut config.view_base_width);
        Self::load_positive_f32("VIEW_BASE_HEIGHT", &mut config.view_base_height);
        Self::load_positive_f32("VIEW_SCALE", &mut config.view_scale);

        config
    }

    fn load_positive_f32(key: &str, target: &mut f32) {
        if let Ok(raw) = std::env::var(key) {
            if let Ok(parsed) = raw.parse::<f32>() {
                if parsed > 0.0 {
                    *target = parsed;
                } else {
                    tracing::warn!("{} must be > 0, using default", key);
                }
            } else {
                tracing::warn!("Invalid {} '{}', using default", key, raw);
            }
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tps == 0 {
            return Err("tps cannot be 0".to_string());
        }
        if self.sleep_check_interval == 0 {
            return Err("sleep_check_interval must be at least 1".to_string());
        }
        if self.grid_cell_size <= 0.0 {
            return Err("grid_cell_size must be positive".to_string());
        }
        if self.view_scale <= 0.0 {
            return Err("view_scale must be positive".to_string());
        }
        Ok(())
    }

    /// Duration of one tick
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tps as f64)
    }

    /// Reconnection grace window measured in ticks
    pub fn reconnect_grace_ticks(&self) -> u32 {
        self.reconnect_grace_secs * self.tps
    }
}
