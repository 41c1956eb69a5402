//! Policy Adjuster
//!
//! Online reinforcement-learning layer on top of the baseline predictor:
//! - Epsilon-greedy choice among decrease / keep / increase
//! - Deterministic multiplicative transform of the baseline interval
//! - Append-only experience log of (state, action, reward, next state)
//! - Batch fitted-Q iteration over the whole log on a retrain cadence

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{PolicyConfig, RewardConfig};
use crate::corpus::{CsvLog, Experience};
use crate::features::FeatureTriple;
use crate::model::{ModelError, ModelResult, ValueFunction};

/// Discrete nudges applied to the baseline interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Decrease = 0,
    Keep = 1,
    Increase = 2,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Decrease, Action::Keep, Action::Increase];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decrease => "decrease",
            Self::Keep => "keep",
            Self::Increase => "increase",
        }
    }
}

/// Highest-valued action; ties resolve keep, then decrease, then increase
pub fn greedy_action(values: &[f64; 3]) -> Action {
    let mut best = Action::Keep;
    for candidate in [Action::Decrease, Action::Increase] {
        if values[candidate.index()] > values[best.index()] {
            best = candidate;
        }
    }
    best
}

/// Reward for the interval chosen this cycle
///
/// Each firing signal contributes its configured value; with none firing the
/// baseline reward applies.
pub fn reward(features: &FeatureTriple, new_interval: f64, min_interval: f64, config: &RewardConfig) -> f64 {
    let mut total = 0.0;
    let mut fired = false;

    if features.manual_count > 0.0 {
        total += config.manual;
        fired = true;
    }
    if features.preference != 0.0 {
        total += config.preference;
        fired = true;
    }
    if new_interval <= min_interval {
        total += config.floor;
        fired = true;
    }

    if fired {
        total
    } else {
        config.baseline
    }
}

/// Epsilon-greedy adjuster over a learned action-value function
pub struct PolicyAdjuster {
    config: PolicyConfig,
    model: Box<dyn ValueFunction>,
    experience: CsvLog,
    rng: StdRng,
}

impl PolicyAdjuster {
    pub fn new(config: PolicyConfig, model: Box<dyn ValueFunction>, experience: CsvLog) -> Self {
        Self::with_rng(config, model, experience, StdRng::from_entropy())
    }

    /// Adjuster with an explicit random source
    pub fn with_rng(
        config: PolicyConfig,
        model: Box<dyn ValueFunction>,
        experience: CsvLog,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            model,
            experience,
            rng,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn action_values(&self, state: &FeatureTriple) -> [f64; 3] {
        self.model.action_values(state)
    }

    /// Explore with probability epsilon, otherwise exploit
    pub fn select_action(&mut self, state: &FeatureTriple) -> Action {
        if self.rng.gen::<f64>() < self.config.epsilon {
            let action = Action::ALL[self.rng.gen_range(0..Action::ALL.len())];
            debug!(action = action.as_str(), "Exploring");
            return action;
        }
        greedy_action(&self.model.action_values(state))
    }

    /// Transform the baseline by `action`, round, and apply the floor
    pub fn apply(&self, baseline: f64, action: Action) -> f64 {
        let scaled = match action {
            Action::Decrease => baseline * self.config.decrease_factor,
            Action::Keep => baseline,
            Action::Increase => baseline * self.config.increase_factor,
        };
        let rounded = scaled.round();
        if rounded >= self.config.min_interval {
            rounded
        } else {
            self.config.min_interval
        }
    }

    pub fn log_experience(&self, experience: &Experience) -> std::io::Result<()> {
        self.experience.append_experience(experience)
    }

    /// Fitted-Q iteration over the full experience log
    ///
    /// Returns the number of transitions trained on. Fewer than the configured
    /// minimum is `InsufficientData` and leaves the model untouched.
    pub fn train_from_log(&mut self) -> ModelResult<usize> {
        let experiences = self.experience.read_experiences()?;
        if experiences.len() < self.config.min_experience_rows {
            return Err(ModelError::InsufficientData {
                have: experiences.len(),
                need: self.config.min_experience_rows,
            });
        }

        let states: Vec<FeatureTriple> = experiences.iter().map(|e| e.state).collect();
        let targets = fitted_q_targets(
            self.model.as_ref(),
            &experiences,
            self.config.alpha,
            self.config.gamma,
        );

        self.model.fit(&states, &targets)?;
        info!(rows = experiences.len(), "Policy model retrained");
        Ok(experiences.len())
    }
}

/// One-step bootstrapped targets blended into the current estimates
///
/// Only the taken action's value moves; the other two keep the model's own
/// prediction so the refit does not drift them.
pub fn fitted_q_targets(
    model: &dyn ValueFunction,
    experiences: &[Experience],
    alpha: f64,
    gamma: f64,
) -> Vec<[f64; 3]> {
    experiences
        .iter()
        .map(|e| {
            let mut q = model.action_values(&e.state);
            let next = model.action_values(&e.next_state);
            let max_next = next.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let target = e.reward + gamma * max_next;
            let a = e.action.index();
            q[a] = (1.0 - alpha) * q[a] + alpha * target;
            q
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinearModel, QModel};
    use tempfile::TempDir;

    fn adjuster(dir: &TempDir, epsilon: f64, model: LinearModel, seed: u64) -> PolicyAdjuster {
        let config = PolicyConfig {
            epsilon,
            min_experience_rows: 3,
            ..PolicyConfig::default()
        };
        PolicyAdjuster::with_rng(
            config,
            Box::new(QModel::with_model(dir.path().join("q_model.json"), model)),
            CsvLog::experience(dir.path().join("q_experience.csv")),
            StdRng::seed_from_u64(seed),
        )
    }

    /// Action values that depend on the state: increase wins when avg > 10
    fn state_dependent_model() -> LinearModel {
        LinearModel::from_weights(vec![
            [1.0, 0.0, 0.0, 0.0],
            [0.5, 0.0, 0.0, 0.0],
            [0.0, 0.1, 0.0, 0.0],
        ])
    }

    #[test]
    fn test_greedy_tie_break_prefers_keep() {
        assert_eq!(greedy_action(&[0.0, 0.0, 0.0]), Action::Keep);
        assert_eq!(greedy_action(&[1.0, 0.0, 1.0]), Action::Decrease);
        assert_eq!(greedy_action(&[0.0, 0.0, 0.1]), Action::Increase);
    }

    #[test]
    fn test_epsilon_zero_always_exploits() {
        let dir = TempDir::new().unwrap();
        let mut policy = adjuster(&dir, 0.0, state_dependent_model(), 11);

        let low = FeatureTriple::new(5.0, 0.0, 0.0);
        let high = FeatureTriple::new(20.0, 0.0, 0.0);
        for _ in 0..200 {
            assert_eq!(policy.select_action(&low), Action::Decrease);
            assert_eq!(policy.select_action(&high), Action::Increase);
        }
    }

    #[test]
    fn test_epsilon_one_is_uniform() {
        let dir = TempDir::new().unwrap();
        let mut policy = adjuster(&dir, 1.0, state_dependent_model(), 42);
        let state = FeatureTriple::new(5.0, 0.0, 0.0);

        let trials = 9000;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            counts[policy.select_action(&state).index()] += 1;
        }

        // Expected 3000 each; 5 sigma is roughly 225
        for count in counts {
            assert!((2700..=3300).contains(&count), "counts {:?}", counts);
        }
    }

    #[test]
    fn test_apply_transforms_and_clamps() {
        let dir = TempDir::new().unwrap();
        let policy = adjuster(&dir, 0.0, LinearModel::zeros(3), 0);

        assert_eq!(policy.apply(10.0, Action::Keep), 10.0);
        assert_eq!(policy.apply(100.0, Action::Decrease), 85.0);
        assert_eq!(policy.apply(100.0, Action::Increase), 115.0);
        assert_eq!(policy.apply(7.4, Action::Keep), 7.0);
        assert_eq!(policy.apply(3.2, Action::Decrease), 3.0);
        assert_eq!(policy.apply(-4.0, Action::Keep), 3.0);
    }

    #[test]
    fn test_reward_shaping() {
        let config = RewardConfig::default();
        let quiet = FeatureTriple::new(10.0, 0.0, 0.0);
        assert_eq!(reward(&quiet, 10.0, 3.0, &config), config.baseline);

        let manual = FeatureTriple::new(10.0, 0.0, 2.0);
        assert_eq!(reward(&manual, 10.0, 3.0, &config), config.manual);

        let preferred = FeatureTriple::new(10.0, -2.0, 0.0);
        assert_eq!(reward(&preferred, 10.0, 3.0, &config), config.preference);

        assert_eq!(reward(&quiet, 3.0, 3.0, &config), config.floor);
        assert_eq!(
            reward(&manual, 3.0, 3.0, &config),
            config.manual + config.floor
        );
    }

    #[test]
    fn test_fitted_q_targets_blend_taken_action_only() {
        let model = QModel::with_model(
            "unused.json",
            LinearModel::from_weights(vec![[1.0, 0.0, 0.0, 0.0], [2.0, 0.0, 0.0, 0.0], [3.0, 0.0, 0.0, 0.0]]),
        );
        let exp = Experience {
            state: FeatureTriple::new(1.0, 0.0, 0.0),
            action: Action::Decrease,
            reward: 1.0,
            next_state: FeatureTriple::new(2.0, 0.0, 0.0),
        };

        let targets = fitted_q_targets(&model, &[exp], 0.1, 0.9);
        // target = 1 + 0.9 * 3 = 3.7; q = 0.9 * 1 + 0.1 * 3.7 = 1.27
        assert!((targets[0][0] - 1.27).abs() < 1e-12);
        assert_eq!(targets[0][1], 2.0);
        assert_eq!(targets[0][2], 3.0);
    }

    #[test]
    fn test_train_from_log_requires_rows() {
        let dir = TempDir::new().unwrap();
        let mut policy = adjuster(&dir, 0.0, LinearModel::zeros(3), 0);
        assert!(matches!(
            policy.train_from_log(),
            Err(ModelError::InsufficientData { have: 0, need: 3 })
        ));
        assert!(!dir.path().join("q_model.json").exists());
    }

    #[test]
    fn test_train_from_log_learns_rewarded_action() {
        let dir = TempDir::new().unwrap();
        let mut policy = adjuster(&dir, 0.0, LinearModel::zeros(3), 0);

        let state = FeatureTriple::new(10.0, 0.0, 1.0);
        for _ in 0..5 {
            policy
                .log_experience(&Experience {
                    state,
                    action: Action::Increase,
                    reward: 1.0,
                    next_state: state,
                })
                .unwrap();
        }

        assert_eq!(policy.train_from_log().unwrap(), 5);
        assert!(dir.path().join("q_model.json").exists());
        assert_eq!(policy.select_action(&state), Action::Increase);
    }
}
