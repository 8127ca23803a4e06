//! A small PID controller with output clamping, used twice per motor port
//! (position loop feeding a speed setpoint, speed loop feeding the raw
//! drive value).

/// Tunable coefficients and output bounds for one controller instance.
#[derive(Clone, Copy, Default)]
pub struct PidConfig {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub lower_limit: f32,
    pub upper_limit: f32,
}

/// A controller's coefficients plus the state carried between ticks.
#[derive(Clone, Copy, Default)]
pub struct Pid {
    pub config: PidConfig,
    previous_output: f32,
    previous_feedback: f32,
    previous_error: f32,
}

impl Pid {
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Clear accumulated state (integral term and derivative history)
    /// without touching the configured coefficients.
    pub fn reset(&mut self) {
        self.previous_output = 0.0;
        self.previous_feedback = 0.0;
        self.previous_error = 0.0;
    }

    /// Advance one tick: `reference` is the setpoint, `feedback` the
    /// measured value. Returns the clamped controller output.
    pub fn update(&mut self, reference: f32, feedback: f32) -> f32 {
        let error = reference - feedback;

        let proportional = self.config.p * error;
        let integral = self.config.i * (error + self.previous_error) * 0.5;
        let derivative = self.config.d * (feedback - self.previous_feedback);

        let mut output = self.previous_output + proportional + integral + derivative;
        output = output.clamp(self.config.lower_limit, self.config.upper_limit);

        self.previous_output = output;
        self.previous_feedback = feedback;
        self.previous_error = error;

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_only_tracks_error() {
        let mut pid = Pid::new(PidConfig {
            p: 1.0,
            i: 0.0,
            d: 0.0,
            lower_limit: -1000.0,
            upper_limit: 1000.0,
        });
        assert_eq!(pid.update(10.0, 0.0), 10.0);
    }

    #[test]
    fn output_is_clamped() {
        let mut pid = Pid::new(PidConfig {
            p: 10.0,
            i: 0.0,
            d: 0.0,
            lower_limit: -5.0,
            upper_limit: 5.0,
        });
        assert_eq!(pid.update(100.0, 0.0), 5.0);
    }

    #[test]
    fn reset_clears_history_not_config() {
        let mut pid = Pid::new(PidConfig {
            p: 1.0,
            i: 1.0,
            d: 0.0,
            lower_limit: -1000.0,
            upper_limit: 1000.0,
        });
        pid.update(10.0, 0.0);
        pid.reset();
        assert_eq!(pid.config.p, 1.0);
        // with history cleared, a zero-error tick yields zero output again
        assert_eq!(pid.update(0.0, 0.0), 0.0);
    }
}
