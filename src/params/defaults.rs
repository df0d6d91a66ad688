//! Default parameter tables of the ALF engine.
//!
//! The tables are grouped into Fortran namelists. Model namelists are only
//! written for the Hamiltonians that read them; generic namelists are written
//! for every run.

use std::fmt;
use std::str::FromStr;

use super::value::ParamValue;
use crate::error::Error;

/// Keys that control how many bins a run adds, not how bins are produced.
pub const RUN_LENGTH_KEYS: [&str; 2] = ["nbin", "cpu_max"];

/// Namelist read only by the analysis step.
pub const POST_PROCESSING_NAMELIST: &str = "VAR_errors";

/// Namelist carrying the Hamiltonian name.
pub const HAM_NAME_NAMELIST: &str = "VAR_ham_name";

/// One key of a namelist with its default value and description.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub value: ParamValue,
    pub doc: String,
}

impl Entry {
    /// Whether this key only sets the run length and stays out of the
    /// parameter comparison of a run directory.
    pub fn is_run_length(&self) -> bool {
        RUN_LENGTH_KEYS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&self.name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Namelist {
    pub name: String,
    pub entries: Vec<Entry>,
}

impl Namelist {
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(key))
    }
}

/// Model variants understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hamiltonian {
    Hubbard,
    HubbardPlainVanilla,
    Kondo,
    TV,
    Lrc,
    Z2Matter,
}

impl Hamiltonian {
    pub const ALL: [Hamiltonian; 6] = [
        Hamiltonian::Hubbard,
        Hamiltonian::HubbardPlainVanilla,
        Hamiltonian::Kondo,
        Hamiltonian::TV,
        Hamiltonian::Lrc,
        Hamiltonian::Z2Matter,
    ];

    /// Name used by the engine and in directory names.
    pub fn name(&self) -> &'static str {
        match self {
            Hamiltonian::Hubbard => "Hubbard",
            Hamiltonian::HubbardPlainVanilla => "Hubbard_Plain_Vanilla",
            Hamiltonian::Kondo => "Kondo",
            Hamiltonian::TV => "tV",
            Hamiltonian::Lrc => "LRC",
            Hamiltonian::Z2Matter => "Z2_Matter",
        }
    }

    /// Model namelists read by this Hamiltonian, in file order.
    pub fn model_namelists(&self) -> &'static [&'static str] {
        match self {
            Hamiltonian::Hubbard => &["VAR_Lattice", "VAR_Model_Generic", "VAR_Hubbard"],
            Hamiltonian::HubbardPlainVanilla => &["VAR_Lattice", "VAR_Hubbard_Plain_Vanilla"],
            Hamiltonian::Kondo => &["VAR_Lattice", "VAR_Model_Generic", "VAR_Kondo"],
            Hamiltonian::TV => &["VAR_Lattice", "VAR_Model_Generic", "VAR_tV"],
            Hamiltonian::Lrc => &["VAR_Lattice", "VAR_Model_Generic", "VAR_LRC"],
            Hamiltonian::Z2Matter => &["VAR_Lattice", "VAR_Z2_Matter"],
        }
    }
}

impl fmt::Display for Hamiltonian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Hamiltonian {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hamiltonian::ALL
            .iter()
            .copied()
            .find(|h| h.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown hamiltonian {}", s)))
    }
}

/// Immutable set of default namelists.
///
/// Built once and handed to whoever needs to resolve parameters.
#[derive(Debug, Clone)]
pub struct Defaults {
    model: Vec<Namelist>,
    generic: Vec<Namelist>,
}

impl Defaults {
    pub fn new(model: Vec<Namelist>, generic: Vec<Namelist>) -> Self {
        Self { model, generic }
    }

    /// The defaults shipped with the engine.
    pub fn standard() -> Self {
        Self {
            model: standard_model_namelists(),
            generic: standard_generic_namelists(),
        }
    }

    pub fn model_namelist(&self, name: &str) -> Option<&Namelist> {
        self.model.iter().find(|n| n.name == name)
    }

    pub fn generic_namelists(&self) -> &[Namelist] {
        &self.generic
    }

    /// Model namelists of `ham`, in file order.
    pub fn model_namelists_for(&self, ham: Hamiltonian) -> Result<Vec<&Namelist>, Error> {
        ham.model_namelists()
            .iter()
            .map(|name| {
                self.model_namelist(name).ok_or_else(|| {
                    Error::InvalidConfig(format!("defaults lack namelist {} needed by {}", name, ham))
                })
            })
            .collect()
    }

    /// Full namelist set for `ham`: model namelists followed by the generic ones.
    pub fn for_hamiltonian(&self, ham: Hamiltonian) -> Result<Vec<Namelist>, Error> {
        let mut out: Vec<Namelist> = self
            .model_namelists_for(ham)?
            .into_iter()
            .cloned()
            .collect();
        out.extend(self.generic.iter().cloned());
        Ok(out)
    }

    /// Whether `key` is one of the model keys of `ham` (generic keys excluded).
    pub fn is_model_key(&self, ham: Hamiltonian, key: &str) -> bool {
        self.model_namelists_for(ham)
            .map(|lists| lists.iter().any(|n| n.get(key).is_some()))
            .unwrap_or(false)
    }
}

fn e(name: &str, value: impl Into<ParamValue>, doc: &str) -> Entry {
    Entry {
        name: name.to_string(),
        value: value.into(),
        doc: doc.to_string(),
    }
}

fn namelist(name: &str, entries: Vec<Entry>) -> Namelist {
    Namelist {
        name: name.to_string(),
        entries,
    }
}

fn standard_generic_namelists() -> Vec<Namelist> {
    vec![
        namelist(
            "VAR_QMC",
            vec![
                e("Nwrap", 10, "Stabilization. Green functions will be computed from scratch after each time interval Nwrap*Dtau."),
                e("Nsweep", 100, "Number of sweeps per bin."),
                e("Nbin", 5, "Number of bins."),
                e("Ltau", 1, "1 to calculate time-displaced Green functions; 0 otherwise."),
                e("LOBS_ST", 0, "Start measurements at time slice LOBS_ST"),
                e("LOBS_EN", 0, "End measurements at time slice LOBS_EN"),
                e("CPU_MAX", 0.0, "Code stops after CPU_MAX hours, if 0 or not specified, the code stops after Nbin bins"),
                e("Propose_S0", false, "Proposes single spin flip moves with probability exp(-S0)."),
                e("Global_moves", false, "Allows for global moves in space and time."),
                e("N_global", 1, "Number of global moves per sweep."),
                e("Global_tau_moves", false, "Allows for global moves on a single time slice."),
                e("N_global_tau", 1, "Number of global moves that will be carried out on a single time slice."),
                e("Nt_sequential_start", 0, ""),
                e("Nt_sequential_end", -1, ""),
                e("Langevin", false, "Langevin update"),
                e("Delta_t_Langevin_HMC", 0.01, "Time step for Langevin or HMC"),
                e("Max_Force", 1.5, "Max Force for Langevin"),
                e("HMC", false, "HMC update"),
                e("Leapfrog_steps", 0, "Number of leapfrog steps"),
            ],
        ),
        namelist(
            "VAR_errors",
            vec![
                e("N_skip", 1, "Number of bins to be skipped."),
                e("N_rebin", 1, "Rebinning: Number of bins to combine into one."),
                e("N_Cov", 0, "If set to 1, covariance computed for time-displaced correlation functions."),
                e("N_Back", 1, "If set to 1, substract background in correlation functions."),
                e("N_auto", 0, "If > 0, calculate autocorrelation."),
            ],
        ),
        namelist(
            "VAR_TEMP",
            vec![
                e("N_exchange_steps", 6, "Number of exchange moves."),
                e("N_Tempering_frequency", 10, "The frequency, in units of sweeps, at which the exchange moves are carried out."),
                e("mpi_per_parameter_set", 2, "Number of mpi-processes per parameter set."),
                e("Tempering_calc_det", true, "Specifies whether the fermion weight has to be taken into account while tempering. Can be set to .F. if the parameters that get varied only enter the Ising action S_0"),
            ],
        ),
        namelist(
            "VAR_Max_Stoch",
            vec![
                e("Ngamma", 400, "Number of Dirac delta-functions for parametrization."),
                e("Om_st", -10.0, "Frequency range lower bound."),
                e("Om_en", 10.0, "Frequency range upper bound."),
                e("Ndis", 2000, "Number of boxes for histogram."),
                e("NBins", 250, "Number of bins for Monte Carlo."),
                e("NSweeps", 70, "Number of sweeps per bin."),
                e("Nwarm", 20, "The Nwarm first bins will be ommitted."),
                e("N_alpha", 14, "Number of temperatures."),
                e("alpha_st", 1.0, ""),
                e("R", 1.2, ""),
                e("Checkpoint", false, ""),
                e("Tolerance", 0.1, ""),
            ],
        ),
    ]
}

fn standard_model_namelists() -> Vec<Namelist> {
    vec![
        namelist(
            "VAR_Lattice",
            vec![
                e("L1", 6, ""),
                e("L2", 6, ""),
                e("Lattice_type", "Square", ""),
                e("Model", "Hubbard", ""),
            ],
        ),
        namelist(
            "VAR_Model_Generic",
            vec![
                e("Checkerboard", true, ""),
                e("Symm", true, ""),
                e("N_SUN", 2, ""),
                e("N_FL", 1, ""),
                e("Phi_X", 0.0, ""),
                e("Phi_Y", 0.0, ""),
                e("Bulk", true, ""),
                e("N_Phi", 0, ""),
                e("Dtau", 0.1, ""),
                e("Beta", 5.0, ""),
                e("Projector", false, ""),
                e("Theta", 10.0, ""),
            ],
        ),
        namelist(
            "VAR_Hubbard",
            vec![
                e("Mz", true, ""),
                e("ham_T", 1.0, ""),
                e("ham_chem", 0.0, ""),
                e("ham_U", 4.0, ""),
                e("ham_T2", 1.0, ""),
                e("ham_U2", 4.0, ""),
                e("ham_Tperp", 1.0, ""),
                e("Continuous", false, "Continuous HS transformation"),
            ],
        ),
        namelist(
            "VAR_tV",
            vec![
                e("ham_T", 1.0, ""),
                e("ham_chem", 0.0, ""),
                e("ham_V", 0.5, ""),
                e("ham_T2", 1.0, ""),
                e("ham_V2", 0.5, ""),
                e("ham_Tperp", 1.0, ""),
                e("ham_Vperp", 0.5, ""),
            ],
        ),
        namelist(
            "VAR_Hubbard_Plain_Vanilla",
            vec![
                e("ham_T", 1.0, ""),
                e("ham_chem", 0.0, ""),
                e("ham_U", 4.0, ""),
                e("Dtau", 0.1, ""),
                e("Beta", 5.0, ""),
                e("Projector", false, ""),
                e("Theta", 10.0, ""),
                e("Symm", true, ""),
            ],
        ),
        namelist(
            "VAR_Kondo",
            vec![
                e("ham_T", 1.0, ""),
                e("ham_chem", 0.0, ""),
                e("ham_Uc", 0.0, ""),
                e("ham_Uf", 2.0, ""),
                e("ham_JK", 2.0, ""),
            ],
        ),
        namelist(
            "VAR_LRC",
            vec![
                e("ham_T", 1.0, ""),
                e("ham_T2", 1.0, ""),
                e("ham_Tperp", 1.0, ""),
                e("ham_chem", 0.0, ""),
                e("ham_U", 4.0, ""),
                e("ham_alpha", 0.1, ""),
                e("Percent_change", 0.1, ""),
            ],
        ),
        namelist(
            "VAR_Z2_Matter",
            vec![
                e("ham_T", 1.0, "Hopping for fermions"),
                e("ham_TZ2", 1.0, "Hopping for orthogonal fermions"),
                e("ham_chem", 0.0, "Chemical potential for fermions"),
                e("ham_U", 0.0, "Hubbard for fermions"),
                e("Ham_J", 1.0, "Hopping Z2 matter fields"),
                e("Ham_K", 1.0, "Plaquette term for gauge fields"),
                e("Ham_h", 1.0, "sigma^x-term for matter"),
                e("Ham_g", 1.0, "tau^x-term for gauge"),
                e("Dtau", 0.1, ""),
                e("Beta", 10.0, ""),
                e("N_SUN", 2, ""),
                e("Projector", false, ""),
                e("Theta", 10.0, ""),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_hamiltonian_resolves() {
        let defaults = Defaults::standard();
        for ham in Hamiltonian::ALL {
            let lists = defaults.for_hamiltonian(ham).unwrap();
            assert_eq!(lists.len(), ham.model_namelists().len() + 4);
            assert_eq!(lists[0].name, "VAR_Lattice");
        }
    }

    #[test]
    fn test_hamiltonian_names_round_trip() {
        for ham in Hamiltonian::ALL {
            assert_eq!(ham.name().parse::<Hamiltonian>().unwrap(), ham);
        }
        assert_eq!("hubbard".parse::<Hamiltonian>().unwrap(), Hamiltonian::Hubbard);
        assert!("Heisenberg".parse::<Hamiltonian>().is_err());
    }

    #[test]
    fn test_model_keys_exclude_generic() {
        let defaults = Defaults::standard();
        assert!(defaults.is_model_key(Hamiltonian::Hubbard, "ham_u"));
        assert!(defaults.is_model_key(Hamiltonian::Hubbard, "BETA"));
        assert!(!defaults.is_model_key(Hamiltonian::Hubbard, "Nsweep"));
        assert!(!defaults.is_model_key(Hamiltonian::Kondo, "Mz"));
    }

    #[test]
    fn test_run_length_keys() {
        let defaults = Defaults::standard();
        let qmc = &defaults.generic_namelists()[0];
        assert!(qmc.get("NBIN").unwrap().is_run_length());
        assert!(qmc.get("CPU_MAX").unwrap().is_run_length());
        assert!(!qmc.get("Nsweep").unwrap().is_run_length());
    }
}
