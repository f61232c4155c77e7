use dendrite::{DendriteError, Model};
use ndarray::array;

fn built(description: &str, batch: usize) -> Model {
    let mut model = Model::compile(description, batch, 0.1).expect("compile");
    model.build().expect("build");
    model
}

#[test]
fn widths_follow_the_declaration() {
    let model = built(
        "/xavier,zero/(in,4,<linear,0>)(hid,3,<relu,0>)(out,2,<linear,0>,<mse,0>)",
        1,
    );
    assert_eq!(model.input_width().unwrap(), 4);
    assert_eq!(model.output_width().unwrap(), 2);
}

#[test]
fn dense_edges_are_spliced_through_fan_points() {
    // in -> hid and hid -> out each gain an implicit fan point, so the
    // three declared layers become five runtime nodes.
    let model = built(
        "/xavier,zero/(in,4,<linear,0>)(hid,3,<relu,0>)(out,2,<linear,0>,<mse,0>)",
        1,
    );
    assert_eq!(model.node_count().unwrap(), 5);
}

#[test]
fn residual_block_builds_six_nodes() {
    // in, the divergence, both branch layers, the convergence, out; the
    // convergence absorbs the open branch tail so nothing is spliced.
    let model = built(
        "/normal 0 0.01,zero/(in,4,<linear,0>)[d,(sk,4,<linear,0>)|(mid,4,<linear,0>)]{j,sk,additive}(out,4,<linear,0>,<mse,0>)",
        1,
    );
    assert_eq!(model.node_count().unwrap(), 6);
    assert_eq!(model.input_width().unwrap(), 4);
    assert_eq!(model.output_width().unwrap(), 4);
}

#[test]
fn recurrent_loop_builds() {
    let model = built(
        "/xavier,zero/(i,4,<sigmoid,0>){merge,man,multiplicative}(k,4,<sigmoid,0>)[split,[man,]](o,2,<relu,0>,<mse,0>)",
        1,
    );
    assert_eq!(model.node_count().unwrap(), 6);
}

#[test]
fn rejects_mismatched_convergence_operands() {
    let mut model = Model::compile(
        "/xavier,zero/(in,4,<linear,0>)[d,(sk,4,<linear,0>)|(mid,3,<linear,0>)]{j,sk,additive}(out,2,<linear,0>,<mse,0>)",
        1,
        0.1,
    )
    .expect("widths are a build-time concern, compile succeeds");
    let err = model.build().err().expect("build must fail");
    assert!(err.to_string().contains("widths differ"), "{err}");
}

#[test]
fn training_requires_build() {
    let mut model = Model::compile(
        "/xavier,zero/(in,2,<linear,0>)(out,1,<linear,0>,<mse,0>)",
        1,
        0.1,
    )
    .expect("compile");
    let err = model
        .train_batch(array![[1.0, 2.0]].view(), array![[0.5]].view(), false)
        .err()
        .expect("train_batch must fail");
    assert!(matches!(err, DendriteError::Usage(_)), "{err}");
}

#[test]
fn batch_dimensions_are_checked() {
    let mut model = built(
        "/xavier,zero/(in,2,<linear,0>)(out,1,<linear,0>,<mse,0>)",
        2,
    );
    // wrong row count
    let err = model
        .train_batch(array![[1.0, 2.0]].view(), array![[0.5]].view(), false)
        .err()
        .expect("must fail");
    assert!(matches!(err, DendriteError::Usage(_)), "{err}");
    // wrong input width
    let err = model
        .train_batch(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].view(),
            array![[0.5], [0.5]].view(),
            false,
        )
        .err()
        .expect("must fail");
    assert!(matches!(err, DendriteError::Usage(_)), "{err}");
}

#[test]
fn parameters_are_reachable_by_name() {
    let model = built(
        "/xavier,zero/(in,4,<linear,0>)(hid,3,<relu,0>)(out,2,<linear,0>,<mse,0>)",
        1,
    );
    let (weights, biases) = model.parameters("hid").unwrap();
    assert_eq!(weights.len(), 3 * 4);
    assert_eq!(biases.len(), 3);
    let (weights, biases) = model.parameters("out").unwrap();
    assert_eq!(weights.len(), 2 * 3);
    assert_eq!(biases.len(), 2);
    assert!(matches!(
        model.parameters("ghost"),
        Err(DendriteError::UnknownNode(_))
    ));
}

#[test]
fn zero_bias_initializer_zeroes_biases() {
    let model = built(
        "/xavier,zero/(in,4,<linear,0>)(out,2,<linear,0>,<mse,0>)",
        1,
    );
    let (_, biases) = model.parameters("out").unwrap();
    assert_eq!(biases, vec![0.0, 0.0]);
}

#[test]
fn uniform_initializer_respects_bounds() {
    let model = built(
        "/uniform -0.5 0.5,zero/(in,8,<linear,0>)(out,4,<linear,0>,<mse,0>)",
        1,
    );
    let (weights, _) = model.parameters("out").unwrap();
    assert_eq!(weights.len(), 32);
    assert!(weights.iter().all(|w| (-0.5..0.5).contains(w)));
}
