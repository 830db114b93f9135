//! Replicated state machine: the local volatile key-value map.

use std::collections::HashMap;

use crate::server::{Command, CommandResult};

/// State is simply a `HashMap` from `String` key -> `String` value.
type State = HashMap<String, String>;

/// The local volatile state machine. Mutations only ever arrive through the
/// learner, after a decree has been decided; reads come straight from the
/// client-facing facade.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: State,
}

impl StateMachine {
    /// Creates a new empty state machine.
    pub fn new() -> Self {
        StateMachine {
            state: State::new(),
        }
    }

    /// Executes given command on the state.
    pub fn execute(&mut self, cmd: &Command) -> CommandResult {
        match cmd {
            Command::Get { key } => CommandResult::Get {
                value: self.state.get(key).cloned(),
            },
            Command::Put { key, value } => {
                self.state.insert(key.clone(), value.clone());
                CommandResult::Put
            }
            Command::Delete { key } => {
                self.state.remove(key);
                CommandResult::Delete
            }
        }
    }

    /// Reads the value of given key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.get(key).cloned()
    }

    /// Number of keys currently present.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

#[cfg(test)]
mod statemach_tests {
    use super::*;
    use rand::{seq::SliceRandom, Rng};

    #[test]
    fn get_empty() {
        let mut sm = StateMachine::new();
        assert_eq!(
            sm.execute(&Command::Get { key: "Jose".into() }),
            CommandResult::Get { value: None }
        );
        assert!(sm.is_empty());
    }

    #[test]
    fn put_one_get_one() {
        let mut sm = StateMachine::new();
        assert_eq!(
            sm.execute(&Command::Put {
                key: "Jose".into(),
                value: "180".into(),
            }),
            CommandResult::Put
        );
        assert_eq!(
            sm.execute(&Command::Get { key: "Jose".into() }),
            CommandResult::Get {
                value: Some("180".into())
            }
        );
        assert_eq!(sm.get("Jose"), Some("180".into()));
    }

    #[test]
    fn put_twice_overwrites() {
        let mut sm = StateMachine::new();
        sm.execute(&Command::Put {
            key: "Jose".into(),
            value: "180".into(),
        });
        sm.execute(&Command::Put {
            key: "Jose".into(),
            value: "185".into(),
        });
        assert_eq!(sm.get("Jose"), Some("185".into()));
        assert_eq!(sm.len(), 1);
    }

    #[test]
    fn delete_present_and_absent() {
        let mut sm = StateMachine::new();
        sm.execute(&Command::Put {
            key: "k".into(),
            value: "v".into(),
        });
        assert_eq!(
            sm.execute(&Command::Delete { key: "k".into() }),
            CommandResult::Delete
        );
        assert_eq!(sm.get("k"), None);
        // deleting an absent key is a no-op
        assert_eq!(
            sm.execute(&Command::Delete { key: "k".into() }),
            CommandResult::Delete
        );
        assert!(sm.is_empty());
    }

    fn gen_rand_str(len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    #[test]
    fn put_rand_get_rand() {
        let mut sm = StateMachine::new();
        let mut ref_state = State::new();
        for _ in 0..100 {
            let key = gen_rand_str(1);
            let value = gen_rand_str(10);
            if rand::random::<u8>() % 4 == 0 {
                sm.execute(&Command::Delete { key: key.clone() });
                ref_state.remove(&key);
            } else {
                sm.execute(&Command::Put {
                    key: key.clone(),
                    value: value.clone(),
                });
                ref_state.insert(key, value);
            }
        }
        let keys: Vec<&String> = ref_state.keys().collect();
        for _ in 0..100 {
            let key: String = match keys.choose(&mut rand::thread_rng()) {
                Some(k) if rand::random() => (*k).clone(),
                _ => "nonexist!".into(),
            };
            assert_eq!(
                sm.execute(&Command::Get { key: key.clone() }),
                CommandResult::Get {
                    value: ref_state.get(&key).cloned()
                }
            );
        }
        assert_eq!(sm.len(), ref_state.len());
    }
}
