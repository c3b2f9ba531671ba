use crate::backtest::{MarketScenario, SyntheticTickGenerator, TickProfile};
use crate::config::Settings;
use crate::execution::{FileSource, SimulationGateway, TickSource};
use crate::models::Account;

/// Everything a simulation run is built from, passed around explicitly
#[derive(Debug, Clone, Default)]
pub struct Context {
    settings: Settings,
}

impl Context {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Fresh account with every configured instrument registered in order
    pub fn account(&self) -> anyhow::Result<Account> {
        if self.settings.instruments.is_empty() {
            anyhow::bail!("No instruments configured");
        }

        let settings = &self.settings.account;
        let mut account = Account::new(settings.name.clone(), settings.balance);
        account.leverage = settings.leverage;
        account.currency = settings.currency.clone();

        for instrument in &self.settings.instruments {
            account.instruments.insert(instrument.to_instrument());
        }

        Ok(account)
    }

    pub fn tick_profiles(&self) -> Vec<TickProfile> {
        self.settings
            .instruments
            .iter()
            .map(|i| TickProfile::new(i.name.clone(), i.base_price, i.step_size))
            .collect()
    }

    /// Generated ticks when `simulation.synthetic` is set, tick files otherwise
    pub fn source(&self) -> Box<dyn TickSource> {
        let simulation = &self.settings.simulation;

        if simulation.synthetic {
            tracing::info!(seed = simulation.seed, "Using {} synthetic ticks per instrument", simulation.ticks);
            let source = SyntheticTickGenerator::new(simulation.seed).source(
                MarketScenario::Sideways,
                &self.tick_profiles(),
                simulation.ticks,
            );
            Box::new(source)
        } else {
            Box::new(FileSource::new(simulation.source.clone()))
        }
    }

    /// Unconnected gateway over a fresh account
    pub fn gateway(&self) -> anyhow::Result<SimulationGateway> {
        Ok(SimulationGateway::new(self.account()?, self.source()))
    }

    pub fn speed(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settings.simulation.speed_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        let settings = Settings::from_toml(
            r#"
            [account]
            name = "Demo"
            balance = 1000.0
            leverage = 2.0

            [simulation]
            synthetic = true
            ticks = 120

            [[instruments]]
            name = "EURUSD"
            base_price = 1.1
            step_size = 0.0001
            step_value = 1.0

            [[instruments]]
            name = "XAUUSD"
            base_price = 2000.0
            "#,
        )
        .unwrap();
        Context::new(settings)
    }

    #[test]
    fn test_account_from_settings() {
        let account = context().account().unwrap();

        assert_eq!(account.name, "Demo");
        assert_eq!(account.leverage, 2.0);
        let names: Vec<&str> = account.instruments.names().collect();
        assert_eq!(names, vec!["EURUSD", "XAUUSD"]);
    }

    #[test]
    fn test_no_instruments_is_an_error() {
        assert!(Context::default().account().is_err());
    }

    #[test]
    fn test_synthetic_gateway_replays() {
        let mut gateway = context().gateway().unwrap();
        gateway.connect();

        assert!(gateway.is_connected());
        assert_eq!(gateway.replay_all(), 240);
    }

    #[test]
    fn test_speed_has_a_floor() {
        let mut context = context();
        context.settings_mut().simulation.speed_ms = 0;
        assert_eq!(context.speed(), std::time::Duration::from_millis(1));
    }
}
