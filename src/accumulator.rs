use chrono::{Datelike, Local, TimeZone};
use log::debug;

use crate::codec::Measurement;

/// Time source for day-rollover detection. `day_of_year` is 1-based (1-366)
/// so that 0 stays free to mean "uninitialised"; `None` means the clock has
/// no valid time yet.
pub trait Clock {
    fn day_of_year(&self) -> Option<u32>;
}

/// Host system clock in local time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn day_of_year(&self) -> Option<u32> {
        Some(Local::now().ordinal())
    }
}

/// Physical quantities derived from one measurement record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedReading {
    /// Average power over the reporting interval, in watts.
    pub watts: f64,
    /// Lifetime energy since process start, in kWh.
    pub lifetime_kwh: f64,
    /// Energy accumulated today, in kWh.
    pub daily_kwh: f64,
}

/// Running pulse totals with daily rollover.
///
/// Lifetime pulses only ever grow for the life of the process. Daily pulses
/// reset once per calendar-day transition; the interval straddling midnight
/// is still credited to the day it was reported, so no pulse is dropped.
pub struct Accumulator {
    lifetime_pulses: u64,
    daily_pulses: u64,
    /// Day of year (1-366) of the last measurement, 0 = uninitialised.
    day_marker: u32,
    pulses_per_kwh: f64,
    pulse_multiplier: f64,
    clock: Option<Box<dyn Clock>>,
}

impl Accumulator {
    pub fn new(pulses_per_kwh: f64, reporting_interval_secs: u8) -> Self {
        let pulse_multiplier =
            (60.0 * f64::from(reporting_interval_secs)) / (pulses_per_kwh / 1000.0);
        Self {
            lifetime_pulses: 0,
            daily_pulses: 0,
            day_marker: 0,
            pulses_per_kwh,
            pulse_multiplier,
            clock: None,
        }
    }

    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = Some(clock);
    }

    pub fn pulses_per_kwh(&self) -> f64 {
        self.pulses_per_kwh
    }

    /// Pulse count to average watts conversion factor.
    pub fn pulse_multiplier(&self) -> f64 {
        self.pulse_multiplier
    }

    /// Fold one measurement into the totals and derive power and energy.
    pub fn ingest(&mut self, measurement: &Measurement) -> DerivedReading {
        let pulses = u64::from(measurement.pulse_count);
        let watts = f64::from(measurement.pulse_count) * self.pulse_multiplier;

        self.lifetime_pulses += pulses;
        let lifetime_kwh = self.lifetime_pulses as f64 / self.pulses_per_kwh;

        // Credited before the rollover check so the last interval of the day
        // lands on the day it was reported.
        self.daily_pulses += pulses;
        let daily_kwh = self.daily_pulses as f64 / self.pulses_per_kwh;

        if let Some(day) = self.current_day(measurement.timestamp) {
            if self.day_marker == 0 {
                self.day_marker = day;
            } else if day != self.day_marker {
                debug!("day rollover {} -> {}, daily total reset", self.day_marker, day);
                self.daily_pulses = 0;
                self.day_marker = day;
            }
        }

        DerivedReading {
            watts,
            lifetime_kwh,
            daily_kwh,
        }
    }

    /// Day of year for rollover detection: the external clock when it has a
    /// valid time, otherwise the measurement's own timestamp as local time.
    fn current_day(&self, timestamp: u32) -> Option<u32> {
        if let Some(clock) = &self.clock {
            if let Some(day) = clock.day_of_year() {
                return Some(day);
            }
        }
        Local
            .timestamp_opt(i64::from(timestamp), 0)
            .single()
            .map(|t| t.ordinal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct TestClock(Rc<Cell<u32>>);

    impl Clock for TestClock {
        fn day_of_year(&self) -> Option<u32> {
            match self.0.get() {
                0 => None,
                day => Some(day),
            }
        }
    }

    fn measurement(pulse_count: u16) -> Measurement {
        Measurement {
            timestamp: 1_623_758_400, // 2021-06-15, well away from year boundaries
            pulse_count,
        }
    }

    #[test]
    fn lifetime_energy_accumulates() {
        let mut acc = Accumulator::new(1000.0, 1);
        let first = acc.ingest(&measurement(100));
        assert!((first.lifetime_kwh - 0.1).abs() < 1e-9);
        let second = acc.ingest(&measurement(100));
        assert!((second.lifetime_kwh - 0.2).abs() < 1e-9);
    }

    #[test]
    fn watts_from_pulse_multiplier() {
        // 1 pulse/Wh at a 1-second reporting interval: 50 pulses in a
        // minute-normalised window is 3 kW.
        let mut acc = Accumulator::new(1000.0, 1);
        assert!((acc.pulse_multiplier() - 60.0).abs() < 1e-9);
        let reading = acc.ingest(&measurement(50));
        assert!((reading.watts - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn first_ingest_sets_day_marker_without_reset() {
        let day = Rc::new(Cell::new(150));
        let mut acc = Accumulator::new(1000.0, 1);
        acc.set_clock(Box::new(TestClock(day)));
        let reading = acc.ingest(&measurement(100));
        assert!((reading.daily_kwh - 0.1).abs() < 1e-9);
        let reading = acc.ingest(&measurement(100));
        assert!((reading.daily_kwh - 0.2).abs() < 1e-9);
    }

    #[test]
    fn day_rollover_credits_old_day_then_resets() {
        let day = Rc::new(Cell::new(150));
        let mut acc = Accumulator::new(1000.0, 1);
        acc.set_clock(Box::new(TestClock(day.clone())));
        acc.ingest(&measurement(100));

        day.set(151);
        // The straddling interval is still credited to the previous total...
        let reading = acc.ingest(&measurement(100));
        assert!((reading.daily_kwh - 0.2).abs() < 1e-9);
        // ...and the next interval starts the new day from zero.
        let reading = acc.ingest(&measurement(100));
        assert!((reading.daily_kwh - 0.1).abs() < 1e-9);
    }

    #[test]
    fn invalid_clock_falls_back_to_measurement_timestamp() {
        let day = Rc::new(Cell::new(0)); // clock never valid
        let mut acc = Accumulator::new(1000.0, 1);
        acc.set_clock(Box::new(TestClock(day)));

        let mut m = measurement(100);
        acc.ingest(&m);
        let reading = acc.ingest(&m);
        assert!((reading.daily_kwh - 0.2).abs() < 1e-9);

        // Two days later by packet time: total resets after the credit.
        m.timestamp += 2 * 86_400;
        acc.ingest(&m);
        let reading = acc.ingest(&m);
        assert!((reading.daily_kwh - 0.1).abs() < 1e-9);
    }

    #[test]
    fn lifetime_survives_day_rollover() {
        let day = Rc::new(Cell::new(10));
        let mut acc = Accumulator::new(1000.0, 1);
        acc.set_clock(Box::new(TestClock(day.clone())));
        acc.ingest(&measurement(500));
        day.set(11);
        let reading = acc.ingest(&measurement(500));
        assert!((reading.lifetime_kwh - 1.0).abs() < 1e-9);
    }
}
