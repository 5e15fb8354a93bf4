use bnnmc_core::sampler::{self, SampleResult, SamplerConfig};
use bnnmc_core::{
    ChainConfig, Dataset, DropoutKind, PosteriorTrace, PriorConfig, Topology, TraceEntry,
};
use ndarray::{Array2, Array3};
use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyList;

fn to_py_err(e: bnnmc_core::Error) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Copy a 2-D float array into a dataset whose first `input_dim` columns are
/// covariates.
fn dataset_from_array(
    name: &str,
    arr: &PyReadonlyArray2<'_, f64>,
    input_dim: usize,
) -> PyResult<Dataset> {
    let view = arr.as_array();
    let (_, cols) = view.dim();
    if cols <= input_dim {
        return Err(PyValueError::new_err(format!(
            "{name} has {cols} columns, need more than {input_dim} (covariates plus targets)"
        )));
    }
    let values: Vec<f64> = view.iter().copied().collect();
    Dataset::new(values, input_dim, cols - input_dim).map_err(to_py_err)
}

#[pyclass]
struct FitResult {
    result: SampleResult,
}

impl FitResult {
    fn num_samples(&self) -> usize {
        self.result.chains.first().map_or(0, |c| c.trace.len())
    }

    /// Stack one vector-valued field of every trace entry into a
    /// (chains, samples, k) array.
    fn stack3(&self, k: usize, field: impl Fn(&TraceEntry) -> &[f64]) -> PyResult<Array3<f64>> {
        let n_chains = self.result.chains.len();
        let n_samples = self.num_samples();
        let mut flat = Vec::with_capacity(n_chains * n_samples * k);
        for chain in &self.result.chains {
            for entry in &chain.trace {
                flat.extend_from_slice(field(entry));
            }
        }
        Array3::from_shape_vec((n_chains, n_samples, k), flat)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    /// Stack one per-entry column of every trace into a (chains, samples)
    /// array.
    fn stack2(&self, column: impl Fn(&PosteriorTrace) -> Vec<f64>) -> PyResult<Array2<f64>> {
        let n_chains = self.result.chains.len();
        let n_samples = self.num_samples();
        let flat: Vec<f64> = self
            .result
            .chains
            .iter()
            .flat_map(|c| column(&c.trace))
            .collect();
        Array2::from_shape_vec((n_chains, n_samples), flat)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn width(&self, field: impl Fn(&TraceEntry) -> usize) -> usize {
        self.result
            .chains
            .first()
            .and_then(|c| c.trace.get(0))
            .map_or(0, field)
    }
}

#[pymethods]
impl FitResult {
    /// Weight traces with shape (chains, samples, w_size).
    fn get_weights<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray3<f64>>> {
        let n_chains = self.result.chains.len();
        let n_samples = self.num_samples();
        let k = self.width(|e| e.w.len());
        let flat: Vec<f64> = self
            .result
            .chains
            .iter()
            .flat_map(|c| c.trace.weights())
            .flatten()
            .collect();
        let arr = Array3::from_shape_vec((n_chains, n_samples, k), flat)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(arr.into_pyarray(py))
    }

    fn get_tau_sq<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray2<f64>>> {
        Ok(self.stack2(PosteriorTrace::tau_sq)?.into_pyarray(py))
    }

    fn get_pred_train<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray3<f64>>> {
        let k = self.width(|e| e.pred_train.len());
        Ok(self.stack3(k, |e| e.pred_train.as_slice())?.into_pyarray(py))
    }

    fn get_pred_test<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray3<f64>>> {
        let k = self.width(|e| e.pred_test.len());
        Ok(self.stack3(k, |e| e.pred_test.as_slice())?.into_pyarray(py))
    }

    fn get_rmse_train<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray2<f64>>> {
        Ok(self.stack2(PosteriorTrace::rmse_train)?.into_pyarray(py))
    }

    fn get_rmse_test<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray2<f64>>> {
        Ok(self.stack2(PosteriorTrace::rmse_test)?.into_pyarray(py))
    }

    fn accept_ratios<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        PyList::new(py, self.result.accept_ratios())
    }

    fn langevin_counts<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        PyList::new(py, self.result.langevin_counts())
    }

    /// Per-chain summary tables after discarding the first `burn_in`
    /// fraction of each trace.
    #[pyo3(signature = (burn_in=0.5))]
    fn summary(&self, burn_in: f64) -> String {
        self.result
            .summaries(burn_in)
            .iter()
            .enumerate()
            .map(|(i, s)| format!("chain {i}\n{}", s.to_table()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn __repr__(&self) -> String {
        let ratios = self
            .result
            .accept_ratios()
            .iter()
            .map(|r| format!("{r:.1}%"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "bnnmc FitResult ({} chains × {} samples)\n  accept ratios: [{}]\n  langevin proposals: {:?}",
            self.result.chains.len(),
            self.num_samples(),
            ratios,
            self.result.langevin_counts()
        )
    }
}

#[pyfunction]
#[pyo3(signature = (
    train,
    test,
    input_size=4,
    hidden_size=5,
    output_size=1,
    num_samples=5000,
    learn_rate=0.01,
    dropout="none",
    input_dropout=0.0,
    hidden_dropout=0.0,
    step_w=0.025,
    step_eta=0.2,
    use_langevin_gradients=true,
    l_prob=0.5,
    sgd_depth=1,
    sigma_sq=25.0,
    nu_1=0.0,
    nu_2=0.0,
    chains=1,
    seed=42,
    threads=0,
    progress=false,
))]
#[allow(clippy::too_many_arguments)]
fn sample(
    py: Python<'_>,
    train: PyReadonlyArray2<'_, f64>,
    test: PyReadonlyArray2<'_, f64>,
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
    num_samples: usize,
    learn_rate: f64,
    dropout: &str,
    input_dropout: f64,
    hidden_dropout: f64,
    step_w: f64,
    step_eta: f64,
    use_langevin_gradients: bool,
    l_prob: f64,
    sgd_depth: usize,
    sigma_sq: f64,
    nu_1: f64,
    nu_2: f64,
    chains: usize,
    seed: u64,
    threads: usize,
    progress: bool,
) -> PyResult<FitResult> {
    let topology = Topology::new(input_size, hidden_size, output_size).map_err(to_py_err)?;
    let dropout: DropoutKind = dropout.parse().map_err(to_py_err)?;
    let train = dataset_from_array("train", &train, input_size)?;
    let test = dataset_from_array("test", &test, input_size)?;

    let config = SamplerConfig {
        num_chains: chains,
        seed,
        num_threads: threads,
        show_progress: progress,
        chain: ChainConfig {
            topology,
            num_samples,
            learn_rate,
            dropout,
            input_dropout,
            hidden_dropout,
            step_w,
            step_eta,
            use_langevin_gradients,
            l_prob,
            sgd_depth,
            prior: PriorConfig {
                sigma_sq,
                nu_1,
                nu_2,
            },
            init_weights: None,
        },
    };

    let result = py
        .allow_threads(|| sampler::sample(&train, &test, config))
        .map_err(to_py_err)?;

    Ok(FitResult { result })
}

#[pymodule]
fn bnnmc(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<FitResult>()?;
    m.add_function(wrap_pyfunction!(sample, m)?)?;
    Ok(())
}
