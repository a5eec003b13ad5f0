//! Registry generation and capacity behavior.
//!
//! These tests reset the process-wide registry, so they live in their own
//! test binary (their own process) and run as a single sequential test.

use prism_ecs::registry::{self, MAX_COMPONENT_TYPES};
use prism_ecs::EcsError;

macro_rules! decl_components {
    ($($name:ident),* $(,)?) => {
        $(#[allow(dead_code)] struct $name;)*
    };
}

macro_rules! register_all {
    ($($name:ident),* $(,)?) => {
        vec![$(registry::register::<$name>()),*]
    };
}

decl_components!(
    C00, C01, C02, C03, C04, C05, C06, C07, C08, C09, C10, C11, C12, C13, C14, C15, C16, C17,
    C18, C19, C20, C21, C22, C23, C24, C25, C26, C27, C28, C29, C30, C31, C32, C33, C34, C35,
    C36, C37, C38, C39, C40, C41, C42, C43, C44, C45, C46, C47, C48, C49, C50, C51, C52, C53,
    C54, C55, C56, C57, C58, C59, C60, C61, C62, C63, C64,
);

#[test]
fn test_capacity_limit_and_generation_reset() {
    registry::reset();
    let start_generation = registry::generation();

    // 65 distinct types: the first 64 fit, the 65th is rejected.
    let results = register_all!(
        C00, C01, C02, C03, C04, C05, C06, C07, C08, C09, C10, C11, C12, C13, C14, C15, C16,
        C17, C18, C19, C20, C21, C22, C23, C24, C25, C26, C27, C28, C29, C30, C31, C32, C33,
        C34, C35, C36, C37, C38, C39, C40, C41, C42, C43, C44, C45, C46, C47, C48, C49, C50,
        C51, C52, C53, C54, C55, C56, C57, C58, C59, C60, C61, C62, C63, C64,
    );

    assert_eq!(results.len(), MAX_COMPONENT_TYPES + 1);
    for (i, result) in results[..MAX_COMPONENT_TYPES].iter().enumerate() {
        assert_eq!(*result.as_ref().unwrap(), i as u8);
    }
    assert!(matches!(
        results[MAX_COMPONENT_TYPES],
        Err(EcsError::CapacityExceeded)
    ));
    assert_eq!(registry::registered_count(), MAX_COMPONENT_TYPES);

    // Registration is idempotent: re-touching an existing type is free.
    assert_eq!(registry::register::<C00>().unwrap(), 0);

    // Reset starts a new generation with fresh dense ids.
    registry::reset();
    assert_eq!(registry::generation(), start_generation + 1);
    assert_eq!(registry::registered_count(), 0);
    assert_eq!(registry::id_of::<C07>(), None);

    // First touch in the new generation reassigns from zero.
    assert_eq!(registry::register::<C64>().unwrap(), 0);
    assert_eq!(registry::register::<C07>().unwrap(), 1);
}
