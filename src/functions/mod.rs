//! The closed function registry consulted by the parser.
//!
//! Names map to tagged enum values; the tag decides which argument slot a
//! parsed function may legally occupy (activation/loss inside a layer,
//! weight/bias initializer inside the header).

pub mod activation;
pub mod convergence;
pub mod init;
pub mod loss;

pub use activation::Activation;
pub use convergence::Convergence;
pub use init::{seed, with_rng, BiasInit, WeightInit};
pub use loss::Loss;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef {
    Activation(Activation),
    Loss(Loss),
    Weight(WeightInit),
    Bias(BiasInit),
}

const REGISTRY: &[(&str, FunctionRef)] = &[
    ("sigmoid", FunctionRef::Activation(Activation::Sigmoid)),
    ("relu", FunctionRef::Activation(Activation::Relu)),
    ("relu_leaky", FunctionRef::Activation(Activation::ReluLeaky)),
    (
        "relu_parametric",
        FunctionRef::Activation(Activation::ReluParametric),
    ),
    ("tanh", FunctionRef::Activation(Activation::Tanh)),
    ("softmax", FunctionRef::Activation(Activation::Softmax)),
    ("elu", FunctionRef::Activation(Activation::Elu)),
    ("gelu", FunctionRef::Activation(Activation::Gelu)),
    ("swish", FunctionRef::Activation(Activation::Swish)),
    ("selu", FunctionRef::Activation(Activation::Selu)),
    ("linear", FunctionRef::Activation(Activation::Linear)),
    ("binary_step", FunctionRef::Activation(Activation::BinaryStep)),
    ("mse", FunctionRef::Loss(Loss::Mse)),
    ("mae", FunctionRef::Loss(Loss::Mae)),
    ("mape", FunctionRef::Loss(Loss::Mape)),
    ("huber", FunctionRef::Loss(Loss::Huber)),
    ("huber_modified", FunctionRef::Loss(Loss::HuberModified)),
    ("hinge", FunctionRef::Loss(Loss::Hinge)),
    ("cross_entropy", FunctionRef::Loss(Loss::CrossEntropy)),
    ("xavier", FunctionRef::Weight(WeightInit::Xavier)),
    ("he", FunctionRef::Weight(WeightInit::He)),
    ("lecun", FunctionRef::Weight(WeightInit::Lecun)),
    ("uniform", FunctionRef::Weight(WeightInit::Uniform)),
    ("normal", FunctionRef::Weight(WeightInit::Normal)),
    ("orthogonal", FunctionRef::Weight(WeightInit::Orthogonal)),
    ("zero", FunctionRef::Bias(BiasInit::Zero)),
    ("const_flat", FunctionRef::Bias(BiasInit::ConstFlat)),
    ("const_uneven", FunctionRef::Bias(BiasInit::ConstUneven)),
];

/// Exact, case-sensitive lookup.
pub fn lookup(name: &str) -> Option<FunctionRef> {
    REGISTRY
        .iter()
        .find(|(entry, _)| *entry == name)
        .map(|(_, f)| *f)
}
