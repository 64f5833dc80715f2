//! Shared setup for the integration suites

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use vam_runtime::driver::sim::{synthetic_catalog, SimCard};
use vam_runtime::{CardDriver, FunctionType, VirtualMachine, VmConfig};

/// A virtual machine over simulated cards, with the cards kept for inspection
pub struct Rig {
    pub vm: VirtualMachine,
    pub cards: Vec<Arc<SimCard>>,
}

impl Rig {
    pub fn card(&self, index: usize) -> &SimCard {
        &self.cards[index]
    }
}

/// Functions the simulated cards can execute
pub const SIMULATED: [FunctionType; 6] = [
    FunctionType::VAdd,
    FunctionType::VSub,
    FunctionType::VMul,
    FunctionType::VReduce,
    FunctionType::VAddReduce,
    FunctionType::VSubReduce,
];

pub fn test_config(cards: usize, slots: u8) -> VmConfig {
    VmConfig {
        cards,
        slots_per_card: slots,
        reconfig_settle_us: 0,
        ..VmConfig::default()
    }
}

pub fn rig(cards: usize, slots: u8) -> Rig {
    rig_with(test_config(cards, slots))
}

pub fn rig_with(config: VmConfig) -> Rig {
    vam_tracing::try_init_for_tests();

    let cards: Vec<Arc<SimCard>> = (0..config.cards)
        .map(|id| Arc::new(SimCard::from_config(id, &config).with_io_timeout(Duration::from_millis(500))))
        .collect();
    let drivers: Vec<Arc<dyn CardDriver>> = cards.iter().map(|c| Arc::clone(c) as Arc<dyn CardDriver>).collect();
    let catalog = synthetic_catalog(config.slots_per_card, &SIMULATED);
    let vm = VirtualMachine::init(drivers, catalog, config).expect("virtual machine should initialise");

    Rig { vm, cards }
}
