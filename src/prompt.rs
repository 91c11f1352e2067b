//! Prompt template for retrieval-augmented answers

use crate::store::ScoredRecord;
use std::fmt::Write as _;

const INSTRUCTIONS: &str = "You are a movie expert. You decide which movie to watch based on the plot. \
Below are some movies with\nplots based on the query of the user. \
You can only suggest movies from the list provided.";

/// Render the generation prompt: instructions, one entry per ranked record, then the question.
pub fn render(records: &[ScoredRecord], question: &str) -> String {
    let mut movies = String::new();
    for record in records {
        // Writing to a String cannot fail
        let _ = write!(movies, "Title: {}\nPlot: {}\n---\n", record.title, record.text);
    }

    format!(
        "\n{INSTRUCTIONS}\n\n### Movies:\n---\n{movies}\n\
         Question: I want to watch a movie about {question}. \
         What movie from the list provided above should I watch?\n\
         You can only suggest movies from the list provided.\n"
    )
}
