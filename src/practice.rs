//! Curated practice problems and per-topic progress.

use crate::completion::CompletionTracker;

#[derive(Debug, PartialEq, Eq)]
pub struct PracticeProblem {
    pub id: &'static str,
    pub title: &'static str,
    /// Problem statement with LaTeX math.
    pub problem: &'static str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PracticeTopic {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub problems: &'static [PracticeProblem],
}

pub static PRACTICE_TOPICS: &[PracticeTopic] = &[
    PracticeTopic {
        id: "calculus-derivatives",
        title: "Derivatives",
        description: "Find the rate of change and slopes of curves.",
        problems: &[
            PracticeProblem {
                id: "deriv-1",
                title: "Basic Power Rule",
                problem: "Find the derivative of $f(x) = 3x^4 - 5x^2 + 7$.",
            },
            PracticeProblem {
                id: "deriv-2",
                title: "Product Rule",
                problem: "Find the derivative of $g(x) = (x^2 + 1)e^x$.",
            },
            PracticeProblem {
                id: "deriv-3",
                title: "Chain Rule",
                problem: "Find the derivative of $h(t) = \\sin(3t^2)$.",
            },
        ],
    },
    PracticeTopic {
        id: "calculus-integrals",
        title: "Integrals",
        description: "Calculate the area under curves.",
        problems: &[
            PracticeProblem {
                id: "integ-1",
                title: "Basic Antiderivative",
                problem: "Evaluate the indefinite integral $\\int (6x^2 - 8x + 3) dx$.",
            },
            PracticeProblem {
                id: "integ-2",
                title: "Integration by Substitution",
                problem: "Evaluate $\\int 2x \\sqrt{1+x^2} dx$.",
            },
            PracticeProblem {
                id: "integ-3",
                title: "Definite Integral",
                problem: "Evaluate the definite integral $\\int_0^1 (x^3 + 1) dx$.",
            },
        ],
    },
    PracticeTopic {
        id: "algebra-linear",
        title: "Linear Equations",
        description: "Solve equations with one or more variables.",
        problems: &[
            PracticeProblem {
                id: "linear-1",
                title: "Solve for x",
                problem: "Solve the equation $5(x - 3) = 2(x + 6)$ for $x$.",
            },
            PracticeProblem {
                id: "linear-2",
                title: "System of Equations",
                problem: "Solve the system of equations: $$ \\begin{cases} 2x + 3y = 7 \\\\ 4x - y = 9 \\end{cases} $$",
            },
        ],
    },
];

pub fn find_problem(id: &str) -> Option<&'static PracticeProblem> {
    PRACTICE_TOPICS
        .iter()
        .flat_map(|topic| topic.problems.iter())
        .find(|problem| problem.id == id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopicProgress {
    pub completed: usize,
    pub total: usize,
}

impl TopicProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

pub fn topic_progress(topic: &PracticeTopic, tracker: &CompletionTracker) -> TopicProgress {
    let completed = topic
        .problems
        .iter()
        .filter(|problem| tracker.is_complete(problem.id))
        .count();
    TopicProgress {
        completed,
        total: topic.problems.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn problem_ids_are_unique() {
        let ids: Vec<&str> = PRACTICE_TOPICS
            .iter()
            .flat_map(|topic| topic.problems.iter().map(|p| p.id))
            .collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), 8);
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn lookup_by_id() {
        assert_eq!(find_problem("integ-2").unwrap().title, "Integration by Substitution");
        assert!(find_problem("nope").is_none());
    }

    #[test]
    fn progress_counts_completed_problems() {
        let mut tracker = CompletionTracker::load(Arc::new(MemoryStore::new()));
        tracker.mark_complete("deriv-1");
        tracker.mark_complete("linear-2");

        let derivatives = topic_progress(&PRACTICE_TOPICS[0], &tracker);
        assert_eq!(derivatives, TopicProgress { completed: 1, total: 3 });
        let linear = topic_progress(&PRACTICE_TOPICS[2], &tracker);
        assert_eq!(linear.percent(), 50.0);
        assert_eq!(TopicProgress { completed: 0, total: 0 }.percent(), 0.0);
    }
}
