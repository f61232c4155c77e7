use dendrite::Model;
use ndarray::{array, Array1, Array2};

const CHAIN: &str =
    "/xavier,zero/(in,4,<linear,0.0>)(hid,3,<relu,0.0>)(out,2,<linear,0.0>,<mse,0.0>)";
const RESIDUAL: &str = "/normal 0 0.01,zero/(in,4,<linear,0>)[d,(sk,4,<linear,0>)|(mid,4,<linear,0>)]{j,sk,additive}(out,4,<linear,0>,<mse,0>)";
const GATED_ZERO: &str = "/normal 0 0.5,zero/(in,3,<linear,0>)[g,(gate,3,<linear,0>)|(sig,3,<tanh,0>)]{m,gate,multiplicative}(out,3,<linear,0>,<mse,0>)";
const TINY: &str =
    "/normal 0 0.6,const_uneven 0 0.1/(in,2,<linear,0>)(hid,3,<sigmoid,0>)(out,1,<sigmoid,0>,<mse,0>)";

fn built(description: &str, batch: usize, learning_rate: f32) -> Model {
    let mut model = Model::compile(description, batch, learning_rate).expect("compile");
    model.build().expect("build");
    model
}

fn identity(width: usize) -> Vec<f32> {
    let mut eye = vec![0.0; width * width];
    for i in 0..width {
        eye[i * width + i] = 1.0;
    }
    eye
}

fn bits(values: &[f32]) -> Vec<u32> {
    values.iter().map(|v| v.to_bits()).collect()
}

#[test]
fn zero_learning_rate_leaves_parameters_bitwise_unchanged() {
    let mut model = built(CHAIN, 1, 0.0);
    let before_hid = model.parameters("hid").unwrap();
    let before_out = model.parameters("out").unwrap();

    let loss = model
        .train_batch(
            array![[1.0, 1.0, 1.0, 1.0]].view(),
            array![[0.0, 0.0]].view(),
            false,
        )
        .unwrap();
    assert!(loss.is_finite() && loss >= 0.0, "loss {loss}");

    let after_hid = model.parameters("hid").unwrap();
    let after_out = model.parameters("out").unwrap();
    assert_eq!(bits(&before_hid.0), bits(&after_hid.0));
    assert_eq!(bits(&before_hid.1), bits(&after_hid.1));
    assert_eq!(bits(&before_out.0), bits(&after_out.0));
    assert_eq!(bits(&before_out.1), bits(&after_out.1));
}

#[test]
fn forward_is_deterministic() {
    let mut model = built(CHAIN, 1, 0.0);
    let input = Array1::from(vec![0.3, -0.2, 0.9, 0.1]);
    let first = model.predict(input.view()).unwrap();
    let second = model.predict(input.view()).unwrap();
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn identity_residual_doubles_the_input() {
    let mut model = built(RESIDUAL, 1, 0.0);
    let eye = identity(4);
    let zeros = vec![0.0; 4];
    model.set_parameters("sk", &eye, &zeros).unwrap();
    model.set_parameters("mid", &eye, &zeros).unwrap();
    model.set_parameters("out", &eye, &zeros).unwrap();

    let output = model
        .predict(array![1.0, 2.0, 3.0, 4.0].view())
        .unwrap();
    assert_eq!(output, vec![2.0, 4.0, 6.0, 8.0]);

    // mse against zero targets: mean((2x)^2) = (4+16+36+64)/4
    let loss = model
        .train_batch(
            array![[1.0, 2.0, 3.0, 4.0]].view(),
            array![[0.0, 0.0, 0.0, 0.0]].view(),
            false,
        )
        .unwrap();
    assert!((loss - 30.0).abs() < 1e-4, "loss {loss}");
}

#[test]
fn additive_residual_splits_gradient_to_both_branches() {
    let mut model = built(RESIDUAL, 1, 0.1);
    let eye = identity(4);
    let zeros = vec![0.0; 4];
    model.set_parameters("sk", &eye, &zeros).unwrap();
    model.set_parameters("mid", &eye, &zeros).unwrap();
    model.set_parameters("out", &eye, &zeros).unwrap();

    model
        .train_batch(
            array![[1.0, 2.0, 3.0, 4.0]].view(),
            array![[0.0, 0.0, 0.0, 0.0]].view(),
            false,
        )
        .unwrap();

    // Both operands of an additive join receive the same gradient, so the
    // identical branches must remain identical after the update.
    let (sk_w, sk_b) = model.parameters("sk").unwrap();
    let (mid_w, mid_b) = model.parameters("mid").unwrap();
    assert_eq!(bits(&sk_w), bits(&mid_w));
    assert_eq!(bits(&sk_b), bits(&mid_b));
    assert_ne!(bits(&sk_w), bits(&identity(4)), "update must have happened");
}

#[test]
fn multiplicative_gate_zeroes_the_output() {
    let mut model = built(GATED_ZERO, 1, 0.0);
    model
        .set_parameters("gate", &vec![0.0; 9], &vec![0.0; 3])
        .unwrap();
    for input in [array![1.0, -2.0, 3.0], array![0.5, 0.5, 0.5]] {
        let output = model.predict(input.view()).unwrap();
        assert_eq!(output, vec![0.0, 0.0, 0.0], "input {input:?}");
    }
}

#[test]
fn divergent_forward_uses_more_than_one_thread() {
    let mut model = built(RESIDUAL, 1, 0.0);
    model
        .train_batch(
            array![[1.0, 0.0, 0.0, 1.0]].view(),
            array![[0.0, 0.0, 0.0, 0.0]].view(),
            false,
        )
        .unwrap();
    assert!(
        model.forward_thread_count().unwrap() > 1,
        "threads: {}",
        model.forward_thread_count().unwrap()
    );
}

#[test]
fn plain_chain_forward_stays_on_one_thread() {
    let mut model = built(CHAIN, 1, 0.0);
    model
        .train_batch(
            array![[1.0, 1.0, 1.0, 1.0]].view(),
            array![[0.0, 0.0]].view(),
            false,
        )
        .unwrap();
    assert_eq!(model.forward_thread_count().unwrap(), 1);
}

#[test]
fn chain_matches_a_reference_dense_implementation() {
    let mut model = built(CHAIN, 1, 0.0);
    let (w_hid, b_hid) = model.parameters("hid").unwrap();
    let (w_out, b_out) = model.parameters("out").unwrap();

    let input = [0.25_f32, -1.0, 0.5, 2.0];
    let mut hidden = [0.0_f32; 3];
    for i in 0..3 {
        let mut sum = b_hid[i];
        for k in 0..4 {
            sum += w_hid[i * 4 + k] * input[k];
        }
        hidden[i] = sum.max(0.0);
    }
    let mut reference = [0.0_f32; 2];
    for i in 0..2 {
        let mut sum = b_out[i];
        for k in 0..3 {
            sum += w_out[i * 3 + k] * hidden[k];
        }
        reference[i] = sum;
    }

    let output = model.predict(Array1::from(input.to_vec()).view()).unwrap();
    for (got, want) in output.iter().zip(reference) {
        assert!((got - want).abs() < 1e-5, "{got} vs {want}");
    }
}

#[test]
fn backward_matches_numerical_differentiation() {
    let learning_rate = 0.5_f32;
    let inputs = array![[0.3_f32, -0.7]];
    let expecteds = array![[0.8_f32]];

    let mut model = built(TINY, 1, learning_rate);
    let (w_hid, b_hid) = model.parameters("hid").unwrap();
    let (w_out, b_out) = model.parameters("out").unwrap();

    let loss_with = |w_hid: &[f32], b_hid: &[f32], w_out: &[f32], b_out: &[f32]| -> f32 {
        let mut probe = built(TINY, 1, 0.0);
        probe.set_parameters("hid", w_hid, b_hid).unwrap();
        probe.set_parameters("out", w_out, b_out).unwrap();
        probe
            .train_batch(inputs.view(), expecteds.view(), false)
            .unwrap()
    };

    model
        .train_batch(inputs.view(), expecteds.view(), false)
        .unwrap();
    let (w_hid_after, b_hid_after) = model.parameters("hid").unwrap();
    let (w_out_after, b_out_after) = model.parameters("out").unwrap();

    let eps = 2e-3_f32;
    let mut check = |index: usize,
                     group: &str,
                     before: &[f32],
                     after: &[f32],
                     probe: &dyn Fn(&[f32]) -> f32| {
        let mut hi = before.to_vec();
        let mut lo = before.to_vec();
        hi[index] += eps;
        lo[index] -= eps;
        let numeric = (probe(&hi) - probe(&lo)) / (2.0 * eps);
        let actual = after[index] - before[index];
        let wanted = -learning_rate * numeric;
        assert!(
            (actual - wanted).abs() <= 1e-4 + 0.02 * wanted.abs(),
            "{group}[{index}]: moved {actual}, finite differences want {wanted}"
        );
    };

    for i in 0..w_hid.len() {
        check(i, "hid weights", &w_hid, &w_hid_after, &|w| {
            loss_with(w, &b_hid, &w_out, &b_out)
        });
    }
    for i in 0..b_hid.len() {
        check(i, "hid biases", &b_hid, &b_hid_after, &|b| {
            loss_with(&w_hid, b, &w_out, &b_out)
        });
    }
    for i in 0..w_out.len() {
        check(i, "out weights", &w_out, &w_out_after, &|w| {
            loss_with(&w_hid, &b_hid, w, &b_out)
        });
    }
    for i in 0..b_out.len() {
        check(i, "out biases", &b_out, &b_out_after, &|b| {
            loss_with(&w_hid, &b_hid, &w_out, b)
        });
    }
}

#[test]
fn sgd_reduces_loss_on_a_fixed_sample() {
    let mut model = built(TINY, 1, 0.5);
    let inputs = array![[0.3_f32, -0.7]];
    let expecteds = array![[0.8_f32]];
    let initial = model
        .train_batch(inputs.view(), expecteds.view(), false)
        .unwrap();
    let mut last = initial;
    for _ in 0..200 {
        last = model
            .train_batch(inputs.view(), expecteds.view(), false)
            .unwrap();
    }
    assert!(
        last < initial,
        "loss went from {initial} to {last} after 200 updates"
    );
}

#[test]
fn gated_graph_trains_without_deadlock() {
    let mut model = built(
        "/xavier,zero/(input,8,<sigmoid,0>)[divman,(bb,8,<relu,0>){converge2,otherman,additive}(alex,8,<tanh,0>)|(otherman,8,<sigmoid,0>)]{convergeman,alex,multiplicative}(output,4,<sigmoid,0>,<mse,0>)",
        2,
        0.1,
    );
    let inputs = Array2::from_shape_fn((2, 8), |(s, i)| 0.1 * (s as f32 + 1.0) * (i as f32 - 3.5));
    let expecteds = Array2::from_shape_fn((2, 4), |(_, i)| if i % 2 == 0 { 1.0 } else { 0.0 });
    for _ in 0..3 {
        let loss = model
            .train_batch(inputs.view(), expecteds.view(), false)
            .unwrap();
        assert!(loss.is_finite(), "loss {loss}");
    }
    assert!(model.forward_thread_count().unwrap() > 1);
}

#[test]
fn recurrent_loop_single_steps_across_batches() {
    let mut model = built(
        "/xavier,zero/(i,4,<sigmoid,0>){merge,man,multiplicative}(k,4,<sigmoid,0>)[split,[man,]](o,2,<sigmoid,0>,<mse,0>)",
        1,
        0.2,
    );
    let (w_before, _) = model.parameters("k").unwrap();
    let inputs = array![[0.2_f32, 0.4, -0.3, 0.9]];
    let expecteds = array![[0.5_f32, 0.1]];
    for _ in 0..2 {
        let loss = model
            .train_batch(inputs.view(), expecteds.view(), false)
            .unwrap();
        assert!(loss.is_finite(), "loss {loss}");
    }
    let (w_after, _) = model.parameters("k").unwrap();
    assert_ne!(bits(&w_before), bits(&w_after), "recurrent layer must update");
}

#[test]
fn train_averages_over_batches() {
    let mut model = built(CHAIN, 2, 0.01);
    let input_batches = vec![
        array![[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]],
        array![[0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]],
    ];
    let expected_batches = vec![
        array![[0.1, 0.2], [0.3, 0.4]],
        array![[0.5, 0.6], [0.7, 0.8]],
    ];
    let mean = model
        .train(&input_batches, &expected_batches, false)
        .unwrap();
    assert!(mean.is_finite() && mean >= 0.0);
}
