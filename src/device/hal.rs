//! Actuator outputs: the light relay pin and the pan servo.
//!
//! The servo is driven with 50 Hz software PWM. A duty cycle of `2.5 + angle / 18`
//! percent maps 0..=180 degrees onto the usual 0.5..2.5 ms pulse.

use rppal::gpio::{Gpio, OutputPin};
use tracing::{debug, info};

use super::DeviceError;
use crate::telemetry::{Direction, MotionPosition};

pub const SERVO_PWM_HZ: f64 = 50.0;
pub const SERVO_CENTER: u8 = 90;
const SERVO_MAX: i16 = 180;

pub trait Actuators: Send {
    fn set_light(&mut self, on: bool) -> Result<(), DeviceError>;

    /// Duty cycle in percent, `0.0` stops the pulse train.
    fn set_servo_duty(&mut self, duty_percent: f64) -> Result<(), DeviceError>;

    /// Light low and PWM off.
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Absolute servo angle for a pan command, clamped to `[0, 180]`.
pub fn servo_angle(position: MotionPosition) -> u8 {
    let offset = i16::from(position.angle);
    let angle = match position.direction {
        Direction::Left => i16::from(SERVO_CENTER) - offset,
        Direction::Right => i16::from(SERVO_CENTER) + offset,
        Direction::Center => i16::from(SERVO_CENTER),
    };
    angle.clamp(0, SERVO_MAX) as u8
}

pub fn duty_cycle(angle: u8) -> f64 {
    2.5 + f64::from(angle) / 18.0
}

pub struct GpioActuators {
    light: OutputPin,
    servo: OutputPin,
}

impl GpioActuators {
    pub fn new(light_pin: u8, servo_pin: u8) -> Result<Self, DeviceError> {
        let gpio = Gpio::new()?;
        let light = gpio.get(light_pin)?.into_output_low();
        let servo = gpio.get(servo_pin)?.into_output_low();
        info!(light_pin, servo_pin, "GPIO outputs initialised");
        Ok(Self { light, servo })
    }
}

impl Actuators for GpioActuators {
    fn set_light(&mut self, on: bool) -> Result<(), DeviceError> {
        if on {
            self.light.set_high();
        } else {
            self.light.set_low();
        }
        Ok(())
    }

    fn set_servo_duty(&mut self, duty_percent: f64) -> Result<(), DeviceError> {
        if duty_percent <= 0.0 {
            self.servo.clear_pwm()?;
            self.servo.set_low();
        } else {
            self.servo
                .set_pwm_frequency(SERVO_PWM_HZ, duty_percent / 100.0)?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.light.set_low();
        self.servo.clear_pwm()?;
        self.servo.set_low();
        Ok(())
    }
}

/// Dry-run outputs for machines without GPIO.
#[derive(Debug, Default)]
pub struct LoggingActuators {
    light_on: bool,
    duty_percent: f64,
}

impl LoggingActuators {
    pub fn light_on(&self) -> bool {
        self.light_on
    }

    pub fn duty_percent(&self) -> f64 {
        self.duty_percent
    }
}

impl Actuators for LoggingActuators {
    fn set_light(&mut self, on: bool) -> Result<(), DeviceError> {
        info!("[DRY RUN] light {}", if on { "ON" } else { "OFF" });
        self.light_on = on;
        Ok(())
    }

    fn set_servo_duty(&mut self, duty_percent: f64) -> Result<(), DeviceError> {
        debug!("[DRY RUN] servo duty {:.2}%", duty_percent);
        self.duty_percent = duty_percent;
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        info!("[DRY RUN] outputs released");
        self.light_on = false;
        self.duty_percent = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(direction: Direction, angle: u8) -> MotionPosition {
        MotionPosition { direction, angle }
    }

    #[test]
    fn pan_offsets_from_center() {
        assert_eq!(servo_angle(position(Direction::Left, 45)), 45);
        assert_eq!(servo_angle(position(Direction::Right, 30)), 120);
        assert_eq!(servo_angle(position(Direction::Left, 90)), 0);
        assert_eq!(servo_angle(position(Direction::Right, 90)), 180);
        assert_eq!(servo_angle(MotionPosition::CENTER), 90);
    }

    #[test]
    fn angles_outside_range_are_clamped() {
        assert_eq!(servo_angle(position(Direction::Left, 200)), 0);
        assert_eq!(servo_angle(position(Direction::Right, 200)), 180);
    }

    #[test]
    fn duty_cycle_spans_servo_range() {
        assert_eq!(duty_cycle(0), 2.5);
        assert_eq!(duty_cycle(90), 7.5);
        assert_eq!(duty_cycle(180), 12.5);
    }

    #[test]
    fn dry_run_tracks_outputs() {
        let mut outputs = LoggingActuators::default();
        outputs.set_light(true).unwrap();
        outputs.set_servo_duty(7.5).unwrap();
        assert!(outputs.light_on());
        assert_eq!(outputs.duty_percent(), 7.5);

        outputs.release().unwrap();
        assert!(!outputs.light_on());
        assert_eq!(outputs.duty_percent(), 0.0);
    }
}
