use egobox_dkl::{DeepKernelLearning, RngKey, ViDkl, DKL_DEFAULT_NUM_STEPS};
use ndarray::{concatenate, Array, Array1, Axis};

fn xsinx(x: &Array1<f64>) -> Array1<f64> {
    (x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())
}

fn main() {
    env_logger::init();

    let xt = Array::linspace(0., 25., 40);
    let yt = xsinx(&xt);

    println!("Train viDKL surrogate of 'xsinx' on {} points", xt.len());
    let mut dkl = DeepKernelLearning::new(ViDkl::params(1, 2)).expect("DKL creation");
    let (fit_key, predict_key) = RngKey::new(42).split();
    dkl.fit(fit_key, &xt, &yt, DKL_DEFAULT_NUM_STEPS, true)
        .expect("DKL fitting");

    let xtest = Array::linspace(0., 25., 26);
    let ytest = xsinx(&xtest);
    let (ypred, samples) = dkl
        .predict(predict_key, &xtest, None, 1000)
        .expect("DKL prediction");
    let ysigma = samples.std_axis(Axis(0), 1.);

    println!("Compute prediction errors (x, err(x), sigma(x))");
    println!(
        "{}",
        concatenate![
            Axis(1),
            xtest.insert_axis(Axis(1)),
            (ypred - ytest).insert_axis(Axis(1)),
            ysigma.insert_axis(Axis(1))
        ]
    );
}
